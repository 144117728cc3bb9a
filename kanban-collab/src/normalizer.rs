//! Background position repair.
//!
//! ```text
//! Stopped ──start()──► sweep ──► [tick] sweep ──► [tick] sweep …
//!    ▲                                   │
//!    └────────────stop()─────────────────┘  (waits for the sweep in flight)
//! ```
//!
//! A sweep lists every board, then repairs each board's lists and cards
//! under its own time budget. One failing board is logged and skipped.
//! Renumbered items are broadcast like any other move.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use kanban_core::{BoardId, OrderingEngine};

use crate::hub::HubHandle;
use crate::mutations::publish_repair;

/// Shortest time between scheduled sweeps, whatever the configuration says.
pub const MIN_INTERVAL: Duration = Duration::from_secs(60);

/// Schedule and budgets for the normalizer.
#[derive(Debug, Clone)]
pub struct NormalizerConfig {
    /// Time between sweeps. Raised to [`MIN_INTERVAL`] if shorter.
    pub interval: Duration,
    /// Deadline for listing boards at the start of a sweep.
    pub list_timeout: Duration,
    /// Deadline for repairing one board.
    pub board_budget: Duration,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30 * 60),
            list_timeout: Duration::from_secs(30),
            board_budget: Duration::from_secs(10),
        }
    }
}

impl NormalizerConfig {
    pub fn effective_interval(&self) -> Duration {
        self.interval.max(MIN_INTERVAL)
    }
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Boards visited.
    pub boards: usize,
    /// Boards where at least one position was rewritten.
    pub repaired: usize,
    /// Boards that errored, timed out, or left items unrepaired.
    pub failed: usize,
    pub items_updated: usize,
    /// Stopped before visiting every board.
    pub cancelled: bool,
}

struct Sweeper {
    engine: OrderingEngine,
    hub: HubHandle,
    config: NormalizerConfig,
    /// Held for the duration of a sweep.
    exclusive: Mutex<()>,
    reports: watch::Sender<Option<SweepReport>>,
}

impl Sweeper {
    async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.effective_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = stop.changed() => {
                    log::info!("Position normalizer received stop signal");
                    return;
                }
                // The first tick fires immediately.
                _ = ticker.tick() => {
                    self.sweep(Some(&stop)).await;
                }
            }
        }
    }

    async fn sweep(&self, stop: Option<&watch::Receiver<bool>>) -> SweepReport {
        let _guard = self.exclusive.lock().await;
        log::info!("Starting position normalization for all boards");

        let mut report = SweepReport::default();
        let boards = match tokio::time::timeout(
            self.config.list_timeout,
            self.engine.store().list_boards(),
        )
        .await
        {
            Ok(Ok(boards)) => boards,
            Ok(Err(e)) => {
                log::error!("Error fetching boards for position normalization: {e}");
                return self.publish(report);
            }
            Err(_) => {
                log::error!(
                    "Fetching boards for position normalization timed out after {:?}",
                    self.config.list_timeout
                );
                return self.publish(report);
            }
        };
        log::info!("Found {} board(s) to check for position conflicts", boards.len());

        for board in boards {
            if stop.is_some_and(|rx| *rx.borrow()) {
                report.cancelled = true;
                log::info!("Position normalization stopped after {} board(s)", report.boards);
                break;
            }
            report.boards += 1;
            self.repair_board(board, &mut report).await;
        }

        log::info!(
            "Completed position normalization: {} board(s), {} repaired, {} failed, {} item(s) renumbered",
            report.boards,
            report.repaired,
            report.failed,
            report.items_updated
        );
        self.publish(report)
    }

    async fn repair_board(&self, board: BoardId, report: &mut SweepReport) {
        let budget = self.config.board_budget;
        let repair = match tokio::time::timeout(budget, self.engine.normalize_board(board)).await {
            Ok(Ok(repair)) => repair,
            Ok(Err(e)) => {
                report.failed += 1;
                log::error!("Error normalizing positions for board {board}: {e}");
                return;
            }
            Err(_) => {
                report.failed += 1;
                log::error!("Normalizing board {board} exceeded its {budget:?} budget");
                return;
            }
        };

        if repair.items_failed() > 0 {
            report.failed += 1;
            log::warn!(
                "Board {board}: {} item(s) could not be renumbered",
                repair.items_failed()
            );
        }
        let updated = repair.items_updated();
        if updated > 0 {
            report.repaired += 1;
            report.items_updated += updated;
            publish_repair(&self.hub, &repair).await;
        } else {
            log::debug!("Board {board} positions already contiguous");
        }
    }

    fn publish(&self, report: SweepReport) -> SweepReport {
        self.reports.send_replace(Some(report.clone()));
        report
    }
}

struct Running {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Periodic repair job over every board.
pub struct PositionNormalizer {
    sweeper: Arc<Sweeper>,
    running: Mutex<Option<Running>>,
}

impl PositionNormalizer {
    pub fn new(engine: OrderingEngine, hub: HubHandle, config: NormalizerConfig) -> Self {
        if config.interval < MIN_INTERVAL {
            log::warn!(
                "Normalizer interval {:?} below floor, using {MIN_INTERVAL:?}",
                config.interval
            );
        }
        let (reports, _) = watch::channel(None);
        Self {
            sweeper: Arc::new(Sweeper {
                engine,
                hub,
                config,
                exclusive: Mutex::new(()),
                reports,
            }),
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &NormalizerConfig {
        &self.sweeper.config
    }

    /// Spawn the loop. Returns false if it was already running.
    pub async fn start(&self) -> bool {
        let mut running = self.running.lock().await;
        if running.is_some() {
            log::warn!("Position normalizer is already running");
            return false;
        }

        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(self.sweeper.clone().run(stop_rx));
        *running = Some(Running { stop, task });
        log::info!(
            "Position normalizer started (interval {:?})",
            self.sweeper.config.effective_interval()
        );
        true
    }

    /// Signal the loop and wait for it, including any sweep in flight.
    /// Returns false if it was not running.
    pub async fn stop(&self) -> bool {
        let mut running = self.running.lock().await;
        let Some(Running { stop, task }) = running.take() else {
            log::warn!("Position normalizer is not running");
            return false;
        };

        let _ = stop.send(true);
        if let Err(e) = task.await {
            log::error!("Position normalizer task ended abnormally: {e}");
        }
        log::info!("Position normalizer stopped");
        true
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Run one sweep now. Waits for a scheduled sweep in flight to finish.
    pub async fn sweep(&self) -> SweepReport {
        self.sweeper.sweep(None).await
    }

    /// Most recent sweep result.
    pub fn last_report(&self) -> Option<SweepReport> {
        self.sweeper.reports.borrow().clone()
    }

    /// Notified after every sweep.
    pub fn reports(&self) -> watch::Receiver<Option<SweepReport>> {
        self.sweeper.reports.subscribe()
    }
}
