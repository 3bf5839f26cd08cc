use tokio::sync::broadcast;

/// Fires once when the process should stop serving and wind down sessions.
pub type ShutdownSender = broadcast::Sender<()>;
pub type ShutdownReceiver = broadcast::Receiver<()>;
