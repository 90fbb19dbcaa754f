pub mod archive;
pub mod config;
pub mod decoder;
pub mod error;
pub mod events;
pub mod queue;
pub mod runner;
pub mod shutdown;
pub mod signals;
pub mod sqlite;
pub mod state;
pub mod store;
pub mod upstream;
pub mod worker;
pub mod workers;

pub use archive::{
    chunk_file_name, elapsed_chunks, fs_timestamp, parse_fs_timestamp, truncate_to_second,
    ChunkWindow, ARCHIVE_BUFFER, ARCHIVE_CHUNK, ARCHIVE_DROPOFF,
};
pub use config::{
    load_airvault_config, AirvaultConfig, PathsSection, ProcessorSection, StreamSection,
    SystemSection, UpstreamSection,
};
pub use decoder::{
    relay_args, splice, splice_args, CommandExecutor, Decoder, DecoderError,
    SystemCommandExecutor, TransportTarget,
};
pub use error::{ConfigError, Result};
pub use events::{Event, EventMessage};
pub use queue::{
    event_channel, EventReceiver, EventSender, DEFAULT_POLL_TIMEOUT, DEFAULT_QUEUE_CAPACITY,
};
pub use runner::{Runner, SubscriptionSpec, SupervisorError, WorkerHandle, STARTUP_WAIT, STOP_WAIT};
pub use shutdown::ShutdownFlag;
pub use state::{
    ActiveStream, Channel, CutContent, CutKind, CutMarker, LiveHandoff, LiveSnapshot, PlayerState,
};
pub use store::{EpisodeRecord, SongRecord, StoreError, TrackStore, TrackStoreBuilder};
pub use upstream::{parse_snapshot, UpstreamClient, UpstreamError};
pub use worker::{
    run_evented, run_periodic, EventedWorker, PeriodicWorker, ReadySignal, Subscriptions,
    WorkerContext, WorkerError,
};
pub use workers::{ArchiverWorker, PlayerWorker, ProcessorWorker, RelayWorker, StatusWorker};
