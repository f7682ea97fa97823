pub use color::{blend_additive, hsv_to_rgb, scale8};
pub use config::{
    CoreConfig, EmitterConfig, FrequencyBand, OnsetConfig, OnsetKind, ParticleConfig, PeakPickerConfig,
    PeakPolicy, PolymetricConfig, RenderConfig, SpectralFrontConfig, TempoConfig, TempoPolicy,
};
pub use error::CoreError;
pub use events::{
    BandOnsetEvent, BeatEvent, FillEvent, OnsetEvent, SubdivisionEvent, SubdivisionKind,
};
pub use onset::{MultiBandNovelty, OnsetFunction};
pub use orchestrator::Orchestrator;
pub use particles::{EmitterKind, ParticleEngine};
pub use peak::PeakPicker;
pub use polymetric::{PolymetricAnalyzer, PolymetricOutputs};
pub use rng::Lcg;
pub use spectral::{SpectralFront, Spectrum};
pub use tempo::TempoTracker;

mod color;
mod config;
mod error;
mod events;
mod onset;
mod orchestrator;
mod particles;
mod peak;
mod polymetric;
mod rng;
mod spectral;
mod tempo;
