//! Server-side device handles returned by the introspection calls.

use crate::proto::{ChannelMap, SinkInfo, SourceInfo};

/// An audio output device on the server.
#[derive(Debug, Clone)]
pub struct Sink {
    pub(crate) info: SinkInfo,
}

impl Sink {
    /// The sink's index.
    pub fn index(&self) -> u32 {
        self.info.sink_index
    }

    /// The sink's name.
    pub fn name(&self) -> &str {
        &self.info.sink_name
    }

    /// The underlying device description.
    pub fn device_name(&self) -> &str {
        &self.info.device
    }

    /// The sink's channel map.
    pub fn channels(&self) -> &ChannelMap {
        &self.info.channel_map
    }

    /// The sink's sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.info.sample_spec.rate
    }

    /// The name of the source monitoring this sink's output.
    pub fn monitor_source_name(&self) -> &str {
        &self.info.monitor_source_name
    }

    /// The full wire-level description.
    pub fn info(&self) -> &SinkInfo {
        &self.info
    }
}

/// An audio input device on the server.
#[derive(Debug, Clone)]
pub struct Source {
    pub(crate) info: SourceInfo,
}

impl Source {
    /// The source's index.
    pub fn index(&self) -> u32 {
        self.info.source_index
    }

    /// The source's name.
    pub fn name(&self) -> &str {
        &self.info.source_name
    }

    /// The underlying device description.
    pub fn device_name(&self) -> &str {
        &self.info.device
    }

    /// The source's channel map.
    pub fn channels(&self) -> &ChannelMap {
        &self.info.channel_map
    }

    /// The source's sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.info.sample_spec.rate
    }

    /// The full wire-level description.
    pub fn info(&self) -> &SourceInfo {
        &self.info
    }
}
