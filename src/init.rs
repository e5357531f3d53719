use crate::layer::PipelineLayer;
use crate::pipeline::Pipeline;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

/// Configuration of the `tracing` bridge.
///
/// **Fields**
/// - `channel_buffer`: maximum number of queued records before new ones
///   are dropped.
/// - `enable_stdout`: if `true`, a `tracing_subscriber::fmt` layer is added
///   next to [`PipelineLayer`] so events are also printed to the console.
///   This is independent of the pipeline's own console mirror.
#[derive(Clone, Debug)]
pub struct LayerConfig {
    pub channel_buffer: usize,
    pub enable_stdout: bool,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            channel_buffer: 1024,
            enable_stdout: false,
        }
    }
}

/// Install `pipeline` as the global `tracing` subscriber.
///
/// **Parameters**
/// - `pipeline`: the pipeline that receives every `tracing` event at or
///   above its threshold.
/// - `config`: [`LayerConfig`] controlling buffering and the extra `fmt`
///   layer.
///
/// **Returns**
///
/// The handle of the background writer task, or an error if a global
/// subscriber was already installed. Must be called within a Tokio runtime.
pub fn init_tracing_with_config(
    pipeline: Arc<Pipeline>,
    config: LayerConfig,
) -> Result<JoinHandle<()>, SetGlobalDefaultError> {
    let (layer, handle) = PipelineLayer::new(pipeline, config.channel_buffer);

    // The two variants have different subscriber types, so each is
    // installed separately.
    if config.enable_stdout {
        let fmt_layer = tracing_subscriber::fmt::layer();
        let subscriber = Registry::default().with(layer).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = Registry::default().with(layer);
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(handle)
}

/// Install `pipeline` as the global subscriber with [`LayerConfig::default`].
pub fn init_tracing(pipeline: Arc<Pipeline>) -> Result<JoinHandle<()>, SetGlobalDefaultError> {
    init_tracing_with_config(pipeline, LayerConfig::default())
}
