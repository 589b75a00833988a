pub mod abort;
pub mod config;
pub mod discovery;
pub mod launcher;
pub mod listener;
pub mod playback;
pub mod prompt;
pub mod protocol;
pub mod replay;
pub mod selection;

pub use abort::{abort_pair, AbortHandle, AbortSignal};
pub use config::{FlixConfig, ProtocolConfig};
pub use discovery::{AddonManifest, AddonRegistry, Discovery, FileRegistry, MemoryRegistry};
pub use launcher::{CommandLauncher, LaunchArgs, LaunchError, ProcessLauncher};
pub use listener::{wait_with_deadline, ResponseListener, WaitOutcome};
pub use playback::{
    EpisodeItem, FixedPrompt, MovieItem, PlayableItem, PlayableRef, PlaybackError, PlaybackFlow,
    ReplayPrompt, SearchItem, SeasonItem, ShowItem,
};
pub use prompt::TerminalPrompt;
pub use protocol::{Coordinator, Gathered, ProtocolError};
pub use replay::{ReplayCache, ReplayRecord};
pub use selection::{collect_results, AutoChooser, Candidate, Chooser};
