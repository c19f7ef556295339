//! Application wiring.
//!
//! [`QueuedeskApp`] owns every component of a running process: the pool, the
//! dispatch service, the notification pipeline and the projections that observers
//! attach to. Transports are built on top of its accessors.

use crate::config::Config;
use crate::lifecycle::NotificationPipeline;
use anyhow::Context;
use queuedesk_core::environment::{Clock, SystemClock};
use queuedesk_core::numbering::NumberingPolicy;
use queuedesk_postgres::{
    PgChangeFeedConnector, PostgresCategoryDirectory, PostgresScheduleDirectory,
    PostgresTicketStore,
};
use queuedesk_core::projection;
use queuedesk_core::ticket::{InvalidPrefix, normalize_prefix};
use queuedesk_projections::{
    ObserverFeed, RoomProjection, RoomQueueProjection, WaitingBoardProjection,
};
use queuedesk_runtime::metrics::MetricsServer;
use queuedesk_runtime::retry::{RetryPolicy, retry_with_backoff};
use queuedesk_runtime::{Broker, DispatchConfig, DispatchService, Notification};
use sqlx::PgPool;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A fully wired Queuedesk process.
pub struct QueuedeskApp {
    config: Arc<Config>,
    pool: PgPool,
    dispatch: DispatchService,
    room: Arc<RoomProjection>,
    board: Arc<WaitingBoardProjection>,
    queue: Arc<RoomQueueProjection>,
    pipeline: NotificationPipeline,
    metrics: Option<MetricsServer>,
    shutdown: CancellationToken,
}

impl QueuedeskApp {
    /// Connect to the store, apply migrations and start the notification pipeline.
    ///
    /// The initial connection is retried with exponential backoff so the process can
    /// start alongside its database.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - the database stays unreachable after the retries
    /// - a migration fails
    /// - the metrics exporter cannot be started
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let config = Arc::new(config);

        let metrics = match config.metrics_addr {
            Some(addr) => {
                let mut server = MetricsServer::new(addr);
                server.start().context("starting metrics exporter")?;
                Some(server)
            }
            None => None,
        };

        info!("Connecting to database...");
        let connect_policy = RetryPolicy::builder()
            .max_retries(5)
            .initial_delay(Duration::from_millis(500))
            .max_delay(Duration::from_secs(10))
            .build();
        let pool = retry_with_backoff(&connect_policy, || {
            queuedesk_postgres::connect(
                &config.postgres.url,
                config.postgres.max_connections,
                config.postgres.connect_timeout,
            )
        })
        .await
        .context("connecting to database")?;

        info!("Running migrations...");
        queuedesk_postgres::migrate(&pool)
            .await
            .context("running migrations")?;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let tickets = Arc::new(PostgresTicketStore::new(pool.clone()));
        let schedule = Arc::new(PostgresScheduleDirectory::new(pool.clone()));

        let dispatch = DispatchService::new(
            tickets.clone(),
            Arc::new(PostgresCategoryDirectory::new(pool.clone())),
            Arc::clone(&clock),
        )
        .with_config(DispatchConfig {
            numbering: NumberingPolicy::new(config.ticket_max_sequence),
        });

        let room = Arc::new(RoomProjection::new(
            tickets.clone(),
            schedule.clone(),
            Arc::clone(&clock),
        ));
        let queue = Arc::new(RoomQueueProjection::new(
            tickets.clone(),
            schedule,
            Arc::clone(&clock),
        ));
        let board = Arc::new(WaitingBoardProjection::new(tickets, clock));

        let shutdown = CancellationToken::new();
        let pipeline = NotificationPipeline::spawn(
            Arc::new(PgChangeFeedConnector::new(pool.clone())),
            &config,
            &shutdown,
        );

        Ok(Self {
            config,
            pool,
            dispatch,
            room,
            board,
            queue,
            pipeline,
            metrics,
            shutdown,
        })
    }

    /// The dispatch service.
    #[must_use]
    pub const fn dispatch(&self) -> &DispatchService {
        &self.dispatch
    }

    /// The broker observers subscribe to.
    #[must_use]
    pub const fn broker(&self) -> &Broker<Notification> {
        self.pipeline.broker()
    }

    /// The connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Rendered Prometheus metrics, when this process exports them.
    #[must_use]
    pub fn render_metrics(&self) -> Option<String> {
        self.metrics.as_ref().and_then(MetricsServer::render)
    }

    /// A live feed for the screen of `room_number`. Ends on application shutdown.
    #[must_use]
    pub fn room_feed(&self, room_number: i32) -> ObserverFeed<RoomProjection> {
        ObserverFeed::new(Arc::clone(&self.room), room_number, self.broker().subscribe())
            .cancel_on(self.shutdown.child_token())
            .keepalive(self.config.observer_keepalive)
    }

    /// A live waiting-board feed for `prefix`. Ends on application shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidPrefix`] for a malformed filter, before subscribing.
    pub fn board_feed(
        &self,
        prefix: Option<&str>,
    ) -> Result<ObserverFeed<WaitingBoardProjection>, InvalidPrefix> {
        let prefix = normalize_prefix(prefix)?.map(str::to_string);
        Ok(
            ObserverFeed::new(Arc::clone(&self.board), prefix, self.broker().subscribe())
                .cancel_on(self.shutdown.child_token())
            .keepalive(self.config.observer_keepalive),
        )
    }

    /// A live feed of today's queue for `room_number`. Ends on application shutdown.
    #[must_use]
    pub fn room_queue_feed(&self, room_number: i32) -> ObserverFeed<RoomQueueProjection> {
        ObserverFeed::new(Arc::clone(&self.queue), room_number, self.broker().subscribe())
            .cancel_on(self.shutdown.child_token())
            .keepalive(self.config.observer_keepalive)
    }

    /// Rooms that have schedule slots, for the doctor's room picker.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the lookup fails.
    pub async fn rooms(&self) -> projection::Result<Vec<i32>> {
        self.queue.rooms().await
    }

    /// Run until `signal` resolves, then shut the pipeline down and close the pool.
    pub async fn run_until(self, signal: impl Future<Output = ()>) {
        info!("Queuedesk is running");
        signal.await;

        info!("Shutting down gracefully...");
        self.pipeline.shutdown(self.config.shutdown_timeout).await;
        self.pool.close().await;
        info!("Graceful shutdown complete");
    }
}
