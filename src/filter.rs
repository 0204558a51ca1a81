//! Filter graph compiler
//!
//! Turns a stage layout into an ffmpeg `-filter_complex` expression. A graph
//! references at most two video layers: input 0 is the base, input 1 the
//! overlay. Deeper stacks are built by chaining stages.
//!
//! Output pads are always `[vout]` and, when the audio plan produces audio,
//! `[aout]`. Pixel format conversion is left to the encoder's `-pix_fmt`.

use crate::audio::{AudioPlan, OverlayAudio};
use crate::dimensions::Dimensions;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const VIDEO_OUT: &str = "vout";
pub const AUDIO_OUT: &str = "aout";

const BASE_INPUT: usize = 0;
const OVERLAY_INPUT: usize = 1;

/// One `[in]filter,filter[out]` chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterChain {
    inputs: Vec<String>,
    filters: Vec<String>,
    outputs: Vec<String>,
}

impl FilterChain {
    pub fn from_pad(pad: impl Into<String>) -> Self {
        Self {
            inputs: vec![pad.into()],
            filters: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn from_pads<I, S>(pads: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inputs: pads.into_iter().map(Into::into).collect(),
            filters: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn then(mut self, filter: impl Into<String>) -> Self {
        self.filters.push(filter.into());
        self
    }

    pub fn to(mut self, pad: impl Into<String>) -> Self {
        self.outputs.push(pad.into());
        self
    }
}

impl fmt::Display for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for pad in &self.inputs {
            write!(f, "[{}]", pad)?;
        }
        f.write_str(&self.filters.join(","))?;
        for pad in &self.outputs {
            write!(f, "[{}]", pad)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterGraph {
    chains: Vec<FilterChain>,
}

impl FilterGraph {
    pub fn push(&mut self, chain: FilterChain) {
        self.chains.push(chain);
    }

    pub fn chains(&self) -> &[FilterChain] {
        &self.chains
    }

    /// Number of distinct `N:v` input pads the graph reads.
    pub fn video_layers(&self) -> usize {
        let mut seen: Vec<&str> = self
            .chains
            .iter()
            .flat_map(|c| c.inputs.iter())
            .filter(|p| p.ends_with(":v"))
            .map(String::as_str)
            .collect();
        seen.sort_unstable();
        seen.dedup();
        seen.len()
    }
}

impl fmt::Display for FilterGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, chain) in self.chains.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            write!(f, "{}", chain)?;
        }
        Ok(())
    }
}

/// Visible interval of an overlay on the output timeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: f64,
    /// `None` keeps the overlay until the base ends.
    pub end: Option<f64>,
}

impl TimeWindow {
    pub fn length(&self) -> Option<f64> {
        self.end.map(|end| end - self.start)
    }

    fn enable_expr(&self) -> String {
        match self.end {
            Some(end) => format!("between(t,{},{})", secs(self.start), secs(end)),
            None => format!("gte(t,{})", secs(self.start)),
        }
    }
}

/// Overlay placement after timing has been resolved.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlacedOverlay {
    pub x: i64,
    pub y: i64,
    pub window: TimeWindow,
    pub scale: Option<Dimensions>,
    /// The overlay is a still image fed as an endless loop.
    pub looped: bool,
}

/// What a stage draws.
#[derive(Debug, Clone, PartialEq)]
pub enum StageLayout {
    /// A single visual source scaled to the frame.
    Still { frame: Dimensions },
    /// Base scaled to the frame, one overlay composited on top.
    Composite {
        frame: Dimensions,
        overlay: PlacedOverlay,
        audio: AudioPlan,
    },
}

pub fn compile(layout: &StageLayout) -> FilterGraph {
    match layout {
        StageLayout::Still { frame } => compile_still(*frame),
        StageLayout::Composite {
            frame,
            overlay,
            audio,
        } => compile_composite(*frame, overlay, audio),
    }
}

fn compile_still(frame: Dimensions) -> FilterGraph {
    let mut graph = FilterGraph::default();
    graph.push(
        FilterChain::from_pad(video_pad(BASE_INPUT))
            .then(format!("scale={}:{}", frame.width, frame.height))
            .then("setsar=1")
            .to(VIDEO_OUT),
    );
    graph
}

fn compile_composite(frame: Dimensions, overlay: &PlacedOverlay, audio: &AudioPlan) -> FilterGraph {
    let mut graph = FilterGraph::default();

    graph.push(
        FilterChain::from_pad(video_pad(BASE_INPUT))
            .then(format!("scale={}:{}", frame.width, frame.height))
            .then("setsar=1")
            .then("setpts=PTS-STARTPTS")
            .to("base"),
    );

    // Geometric transform, then temporal placement.
    let mut layer = FilterChain::from_pad(video_pad(OVERLAY_INPUT));
    if let Some(scale) = overlay.scale {
        layer = layer.then(format!("scale={}:{}", scale.width, scale.height));
    }
    layer = layer.then("setpts=PTS-STARTPTS");
    if overlay.window.start > 0.0 {
        layer = layer.then(format!("setpts=PTS+{}/TB", secs(overlay.window.start)));
    }
    graph.push(layer.to("layer"));

    let mut composite = format!(
        "overlay=x={}:y={}:enable='{}':eof_action=pass",
        overlay.x,
        overlay.y,
        overlay.window.enable_expr()
    );
    if overlay.looped {
        composite.push_str(":shortest=1");
    }
    graph.push(
        FilterChain::from_pads(["base", "layer"])
            .then(composite)
            .to(VIDEO_OUT),
    );

    for chain in audio_chains(audio) {
        graph.push(chain);
    }

    graph
}

/// Audio chains for a two-input stage. Empty for [`AudioPlan::None`].
pub fn audio_chains(plan: &AudioPlan) -> Vec<FilterChain> {
    match plan {
        AudioPlan::Mix(overlay) => vec![
            FilterChain::from_pad(audio_pad(BASE_INPUT))
                .then("asetpts=PTS-STARTPTS")
                .to("basea"),
            overlay_audio_chain(overlay).to("layera"),
            FilterChain::from_pads(["basea", "layera"])
                .then("amix=inputs=2:duration=longest:dropout_transition=0")
                .to(AUDIO_OUT),
        ],
        AudioPlan::BaseOnly => vec![FilterChain::from_pad(audio_pad(BASE_INPUT))
            .then("asetpts=PTS-STARTPTS")
            .to(AUDIO_OUT)],
        AudioPlan::OverlayOnly(overlay) => vec![overlay_audio_chain(overlay).to(AUDIO_OUT)],
        AudioPlan::None => Vec::new(),
    }
}

fn overlay_audio_chain(overlay: &OverlayAudio) -> FilterChain {
    let mut chain = FilterChain::from_pad(audio_pad(OVERLAY_INPUT));
    if let Some(trim) = overlay.trim {
        chain = chain.then(format!("atrim=start=0:end={}", secs(trim)));
    }
    chain
        .then("asetpts=PTS-STARTPTS")
        .then(format!("adelay={}:all=1", overlay.delay_ms()))
}

fn video_pad(input: usize) -> String {
    format!("{}:v", input)
}

fn audio_pad(input: usize) -> String {
    format!("{}:a", input)
}

/// Seconds formatted for filter arguments, at most millisecond precision.
pub(crate) fn secs(value: f64) -> String {
    let rounded = (value * 1000.0).round() / 1000.0;
    if rounded == rounded.trunc() {
        format!("{}", rounded as i64)
    } else {
        format!("{}", rounded)
    }
}
