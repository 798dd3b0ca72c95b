use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

/// Events driving the watch loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
  /// Periodic tick for query polling and redraw
  Tick,
  /// Time to refetch from the network
  Refresh,
  /// Ctrl-C
  Quit,
}

/// Event handler that produces ticks, refresh requests and Ctrl-C
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  /// Create a handler ticking every `tick_rate` and asking for a refresh every
  /// `refresh_every`. The first refresh comes one full period after start.
  pub fn new(tick_rate: Duration, refresh_every: Duration) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    let timer_tx = tx.clone();
    tokio::spawn(async move {
      let mut tick = interval(tick_rate);
      let mut refresh = interval(refresh_every);
      tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
      refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);
      refresh.tick().await;

      loop {
        let event = tokio::select! {
          _ = tick.tick() => Event::Tick,
          _ = refresh.tick() => Event::Refresh,
        };
        if timer_tx.send(event).is_err() {
          break;
        }
      }
    });

    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        let _ = tx.send(Event::Quit);
      }
    });

    Self { rx }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}
