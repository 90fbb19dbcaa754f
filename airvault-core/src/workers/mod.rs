pub mod archiver;
pub mod player;
pub mod processor;
pub mod relay;
pub mod status;

pub use archiver::ArchiverWorker;
pub use player::PlayerWorker;
pub use processor::ProcessorWorker;
pub use relay::RelayWorker;
pub use status::StatusWorker;
