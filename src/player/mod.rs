// 播放器核心模块

pub mod input;
pub mod demuxer_source;
pub mod packet_log;
pub mod handler;
pub mod decoder;
pub mod demuxer;
pub mod audio_sink;
pub mod audio_output;
pub mod subtitle_queue;
pub mod sync_loop;
pub mod manager;

#[cfg(test)]
pub(crate) mod testing;

pub use input::{FileInput, InputSource, MemoryInput, ReaderInput};
pub use demuxer_source::{ContainerReader, PacketList};
pub use packet_log::{PacketLogReader, PacketLogWriter};
pub use handler::{AudioHandler, HandlerSet, StreamHandler, SubtitleHandler, UnitQueue, VideoHandler};
pub use decoder::{PcmAudioDecoder, RawVideoDecoder, SubtitleHeader, SubtitlePayload, TextSubtitleDecoder};
pub use demuxer::{Demuxer, RouteStats};
pub use audio_sink::{volume_to_gain_db, AudioLine, AudioSink};
pub use audio_output::default_line;
#[cfg(feature = "cpal-output")]
pub use audio_output::CpalLine;
pub use subtitle_queue::SubtitleQueue;
pub use sync_loop::{SyncLoop, SyncStats, TickOutcome};
pub use manager::{default_handlers, Player, PlayerCommand};
