//! Effect catalogue and parameter model.
//!
//! `EffectKind` is the closed set of effect types the factory knows how to
//! build. Each kind carries a static descriptor listing its parameters with
//! their declared ranges and defaults. Parameter values travel as a
//! [`ParameterSet`]: a flat map for most effects, an ordered band list for the
//! parametric EQ.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::dsp::filter::FilterType;
use crate::error::ProjectError;

// ── Effect kinds ────────────────────────────────────────────

/// Closed enumeration of effect types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EffectKind {
    GraphicEq,
    ParametricEq,
    PrecisionEq,
    Compressor,
    Delay,
    Chorus,
    Saturation,
    Reverb,
    EtherealShimmer,
    BlackHole,
    PlanetaryPhaser,
    InfiniteFilter,
}

impl EffectKind {
    pub const ALL: [EffectKind; 12] = [
        EffectKind::GraphicEq,
        EffectKind::ParametricEq,
        EffectKind::PrecisionEq,
        EffectKind::Compressor,
        EffectKind::Delay,
        EffectKind::Chorus,
        EffectKind::Saturation,
        EffectKind::Reverb,
        EffectKind::EtherealShimmer,
        EffectKind::BlackHole,
        EffectKind::PlanetaryPhaser,
        EffectKind::InfiniteFilter,
    ];

    /// Stable type tag stored in project files.
    pub fn id(self) -> &'static str {
        match self {
            EffectKind::GraphicEq => "graphic_eq",
            EffectKind::ParametricEq => "parametric_eq",
            EffectKind::PrecisionEq => "precision_eq",
            EffectKind::Compressor => "compressor",
            EffectKind::Delay => "delay",
            EffectKind::Chorus => "chorus",
            EffectKind::Saturation => "saturation",
            EffectKind::Reverb => "reverb",
            EffectKind::EtherealShimmer => "ethereal_shimmer",
            EffectKind::BlackHole => "black_hole_voice",
            EffectKind::PlanetaryPhaser => "planetary_phaser",
            EffectKind::InfiniteFilter => "infinitFilter",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.id() == id)
    }

    pub fn descriptor(self) -> &'static EffectDescriptor {
        match self {
            EffectKind::GraphicEq => &GRAPHIC_EQ,
            EffectKind::ParametricEq => &PARAMETRIC_EQ,
            EffectKind::PrecisionEq => &PRECISION_EQ,
            EffectKind::Compressor => &COMPRESSOR,
            EffectKind::Delay => &DELAY,
            EffectKind::Chorus => &CHORUS,
            EffectKind::Saturation => &SATURATION,
            EffectKind::Reverb => &REVERB,
            EffectKind::EtherealShimmer => &SHIMMER,
            EffectKind::BlackHole => &BLACK_HOLE,
            EffectKind::PlanetaryPhaser => &PHASER,
            EffectKind::InfiniteFilter => &INFINITE_FILTER,
        }
    }

    /// Whether parameters are an ordered band list rather than a flat map.
    pub fn uses_band_list(self) -> bool {
        self == EffectKind::ParametricEq
    }

    /// Parameter set for a freshly added instance.
    pub fn default_parameters(self) -> ParameterSet {
        if self.uses_band_list() {
            return ParameterSet::BandList(Vec::new());
        }
        let map = self
            .descriptor()
            .params
            .iter()
            .map(|spec| (spec.id.to_string(), spec.range.default_value()))
            .collect();
        ParameterSet::Flat(map)
    }
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl Serialize for EffectKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.id())
    }
}

impl<'de> Deserialize<'de> for EffectKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let id = String::deserialize(deserializer)?;
        EffectKind::from_id(&id)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown effect type {id}")))
    }
}

// ── Descriptors ─────────────────────────────────────────────

/// Declared domain of one parameter.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ParamRange {
    Number {
        min: f64,
        max: f64,
        default: f64,
        step: f64,
    },
    Choice {
        options: &'static [&'static str],
        default: &'static str,
    },
}

impl ParamRange {
    pub fn default_value(&self) -> ParamValue {
        match *self {
            ParamRange::Number { default, .. } => ParamValue::Number(default),
            ParamRange::Choice { default, .. } => ParamValue::Choice(default.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ParamSpec {
    pub id: &'static str,
    pub label: &'static str,
    pub range: ParamRange,
}

#[derive(Debug, Serialize)]
pub struct EffectDescriptor {
    pub id: &'static str,
    pub name: &'static str,
    pub category: &'static str,
    pub params: &'static [ParamSpec],
}

impl EffectDescriptor {
    pub fn param(&self, id: &str) -> Option<&'static ParamSpec> {
        self.params.iter().find(|p| p.id == id)
    }
}

const fn num(id: &'static str, label: &'static str, min: f64, max: f64, default: f64, step: f64) -> ParamSpec {
    ParamSpec {
        id,
        label,
        range: ParamRange::Number { min, max, default, step },
    }
}

const fn choice(
    id: &'static str,
    label: &'static str,
    options: &'static [&'static str],
    default: &'static str,
) -> ParamSpec {
    ParamSpec {
        id,
        label,
        range: ParamRange::Choice { options, default },
    }
}

const fn mix(default: f64) -> ParamSpec {
    num("mix", "Mix", 0.0, 1.0, default, 0.01)
}

const ALL_FILTER_TYPES: &[&str] = &[
    "lowpass", "highpass", "bandpass", "lowshelf", "highshelf", "peaking", "notch", "allpass",
];
const SWEEP_FILTER_TYPES: &[&str] = &["lowpass", "highpass", "bandpass", "notch"];
pub const SHIMMER_PITCHES: &[&str] = &["+1 Octave", "+2 Octaves", "+5 Semitones"];

/// Graphic EQ bands: parameter id and fixed center frequency.
pub const GRAPHIC_EQ_BANDS: [(&str, f64); 10] = [
    ("gain_32hz", 32.0),
    ("gain_64hz", 64.0),
    ("gain_125hz", 125.0),
    ("gain_250hz", 250.0),
    ("gain_500hz", 500.0),
    ("gain_1k", 1000.0),
    ("gain_2k", 2000.0),
    ("gain_4k", 4000.0),
    ("gain_8k", 8000.0),
    ("gain_16k", 16000.0),
];

pub const GRAPHIC_EQ_GAIN_LIMIT: f64 = 18.0;

static GRAPHIC_EQ: EffectDescriptor = EffectDescriptor {
    id: "graphic_eq",
    name: "Graphic EQ",
    category: "EQ",
    params: &[
        num("gain_32hz", "32 Hz", -18.0, 18.0, 0.0, 0.1),
        num("gain_64hz", "64 Hz", -18.0, 18.0, 0.0, 0.1),
        num("gain_125hz", "125 Hz", -18.0, 18.0, 0.0, 0.1),
        num("gain_250hz", "250 Hz", -18.0, 18.0, 0.0, 0.1),
        num("gain_500hz", "500 Hz", -18.0, 18.0, 0.0, 0.1),
        num("gain_1k", "1 kHz", -18.0, 18.0, 0.0, 0.1),
        num("gain_2k", "2 kHz", -18.0, 18.0, 0.0, 0.1),
        num("gain_4k", "4 kHz", -18.0, 18.0, 0.0, 0.1),
        num("gain_8k", "8 kHz", -18.0, 18.0, 0.0, 0.1),
        num("gain_16k", "16 kHz", -18.0, 18.0, 0.0, 0.1),
    ],
};

static PARAMETRIC_EQ: EffectDescriptor = EffectDescriptor {
    id: "parametric_eq",
    name: "Parametric EQ",
    category: "EQ",
    params: &[],
};

static PRECISION_EQ: EffectDescriptor = EffectDescriptor {
    id: "precision_eq",
    name: "Precision EQ",
    category: "EQ",
    params: &[
        choice("band1_type", "Low Type", ALL_FILTER_TYPES, "lowshelf"),
        num("band1_freq", "Low Freq", 20.0, 1000.0, 100.0, 1.0),
        num("band1_gain", "Low Gain", -24.0, 24.0, 0.0, 0.1),
        choice("band2_type", "Low-Mid Type", ALL_FILTER_TYPES, "peaking"),
        num("band2_freq", "Low-Mid Freq", 100.0, 5000.0, 500.0, 1.0),
        num("band2_gain", "Low-Mid Gain", -24.0, 24.0, 0.0, 0.1),
        num("band2_q", "Low-Mid Q", 0.1, 18.0, 1.0, 0.01),
        choice("band3_type", "High-Mid Type", ALL_FILTER_TYPES, "peaking"),
        num("band3_freq", "High-Mid Freq", 500.0, 12000.0, 2500.0, 1.0),
        num("band3_gain", "High-Mid Gain", -24.0, 24.0, 0.0, 0.1),
        num("band3_q", "High-Mid Q", 0.1, 18.0, 1.0, 0.01),
        choice("band4_type", "High Type", ALL_FILTER_TYPES, "highshelf"),
        num("band4_freq", "High Freq", 2000.0, 20000.0, 8000.0, 1.0),
        num("band4_gain", "High Gain", -24.0, 24.0, 0.0, 0.1),
    ],
};

static COMPRESSOR: EffectDescriptor = EffectDescriptor {
    id: "compressor",
    name: "Compressor",
    category: "Dynamics",
    params: &[
        num("threshold", "Threshold", -100.0, 0.0, -24.0, 0.1),
        num("knee", "Knee", 0.0, 40.0, 30.0, 0.1),
        num("ratio", "Ratio", 1.0, 20.0, 12.0, 0.1),
        num("attack", "Attack", 0.0, 1.0, 0.003, 0.001),
        num("release", "Release", 0.0, 1.0, 0.25, 0.001),
    ],
};

static DELAY: EffectDescriptor = EffectDescriptor {
    id: "delay",
    name: "Delay",
    category: "Delay",
    params: &[
        num("time", "Time", 0.0, 5.0, 0.5, 0.01),
        num("feedback", "Feedback", 0.0, 0.95, 0.4, 0.01),
        mix(0.5),
    ],
};

static CHORUS: EffectDescriptor = EffectDescriptor {
    id: "chorus",
    name: "Chorus",
    category: "Modulation",
    params: &[
        num("rate", "Rate", 0.1, 10.0, 1.5, 0.1),
        num("depth", "Depth", 0.0, 1.0, 0.3, 0.01),
        num("delay", "Delay", 0.005, 0.05, 0.02, 0.001),
        mix(0.5),
    ],
};

static SATURATION: EffectDescriptor = EffectDescriptor {
    id: "saturation",
    name: "Saturation",
    category: "Distortion",
    params: &[
        num("drive", "Drive", 0.0, 100.0, 20.0, 1.0),
        num("tone", "Tone", 500.0, 20000.0, 8000.0, 10.0),
        mix(0.5),
    ],
};

static REVERB: EffectDescriptor = EffectDescriptor {
    id: "reverb",
    name: "Reverb",
    category: "Reverb",
    params: &[
        num("decay", "Decay", 0.1, 10.0, 2.0, 0.1),
        num("preDelay", "Pre-Delay (ms)", 0.0, 500.0, 20.0, 1.0),
        mix(0.3),
    ],
};

static SHIMMER: EffectDescriptor = EffectDescriptor {
    id: "ethereal_shimmer",
    name: "Ethereal Shimmer",
    category: "Reverb",
    params: &[
        num("decay", "Decay", 0.5, 10.0, 3.0, 0.1),
        num("shimmer_amount", "Shimmer", 0.0, 1.0, 0.5, 0.01),
        choice("shimmer_pitch", "Pitch", SHIMMER_PITCHES, "+1 Octave"),
        num("tone", "Tone", 500.0, 20000.0, 6000.0, 10.0),
        mix(0.4),
    ],
};

static BLACK_HOLE: EffectDescriptor = EffectDescriptor {
    id: "black_hole_voice",
    name: "Black Hole Voice",
    category: "Distortion",
    params: &[
        num("frequency", "Frequency", 20.0, 20000.0, 800.0, 1.0),
        num("q", "Resonance", 0.1, 30.0, 8.0, 0.1),
        num("gain", "Gain", -40.0, 40.0, 12.0, 0.1),
        num("gravity", "Gravity", 0.0, 100.0, 30.0, 1.0),
        mix(0.5),
    ],
};

static PHASER: EffectDescriptor = EffectDescriptor {
    id: "planetary_phaser",
    name: "Planetary Phaser",
    category: "Modulation",
    params: &[
        num("rate", "Rate", 0.05, 10.0, 0.5, 0.01),
        num("depth", "Depth", 0.0, 1.0, 0.7, 0.01),
        num("baseFrequency", "Base Frequency", 100.0, 5000.0, 800.0, 1.0),
        num("feedback", "Feedback", 0.0, 0.95, 0.5, 0.01),
        mix(0.5),
    ],
};

static INFINITE_FILTER: EffectDescriptor = EffectDescriptor {
    id: "infinitFilter",
    name: "Infinite Filter",
    category: "Filter",
    params: &[
        choice("type", "Type", SWEEP_FILTER_TYPES, "lowpass"),
        num("frequency", "Cutoff", 20.0, 20000.0, 1000.0, 1.0),
        num("q", "Resonance", 0.1, 30.0, 5.0, 0.1),
        num("lfo_rate", "LFO Rate", 0.01, 20.0, 0.5, 0.01),
        num("lfo_depth", "LFO Depth", 0.0, 5000.0, 500.0, 1.0),
        mix(1.0),
    ],
};

// ── Parameter values ────────────────────────────────────────

/// A single parameter value: numeric, or one of a fixed set of choices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Number(f64),
    Choice(String),
}

/// One band of the parametric EQ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Band {
    #[serde(rename = "type", default = "default_band_type")]
    pub filter_type: FilterType,
    pub freq: f64,
    #[serde(default)]
    pub gain: f64,
    #[serde(default = "default_band_q")]
    pub q: f64,
}

fn default_band_type() -> FilterType {
    FilterType::Peaking
}

fn default_band_q() -> f64 {
    1.0
}

/// Highest band frequency accepted, in Hz.
pub const MAX_BAND_FREQUENCY: f64 = 24000.0;

impl Band {
    pub fn peaking(freq: f64, gain: f64) -> Self {
        Band {
            filter_type: FilterType::Peaking,
            freq,
            gain,
            q: default_band_q(),
        }
    }

    /// Frequency in `(0, MAX_BAND_FREQUENCY]`, finite gain, finite positive Q.
    pub fn check(&self) -> Result<(), String> {
        if !(self.freq > 0.0 && self.freq <= MAX_BAND_FREQUENCY) {
            return Err(format!("frequency {} out of range", self.freq));
        }
        if !self.gain.is_finite() {
            return Err(format!("gain {} is not finite", self.gain));
        }
        if !(self.q > 0.0 && self.q.is_finite()) {
            return Err(format!("Q {} must be positive", self.q));
        }
        Ok(())
    }
}

/// Parameter bag of one effect instance.
///
/// Serialized untagged so a project file carries a JSON array for the
/// parametric EQ and a JSON object for everything else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterSet {
    BandList(Vec<Band>),
    Flat(BTreeMap<String, ParamValue>),
}

impl ParameterSet {
    pub fn number(&self, key: &str) -> Option<f64> {
        match self {
            ParameterSet::Flat(map) => match map.get(key) {
                Some(ParamValue::Number(v)) => Some(*v),
                _ => None,
            },
            ParameterSet::BandList(_) => None,
        }
    }

    pub fn choice(&self, key: &str) -> Option<&str> {
        match self {
            ParameterSet::Flat(map) => match map.get(key) {
                Some(ParamValue::Choice(v)) => Some(v.as_str()),
                _ => None,
            },
            ParameterSet::BandList(_) => None,
        }
    }

    pub fn bands(&self) -> Option<&[Band]> {
        match self {
            ParameterSet::BandList(bands) => Some(bands),
            ParameterSet::Flat(_) => None,
        }
    }

    /// Set a numeric value in a flat set. No-op on band lists.
    pub fn set_number(&mut self, key: &str, value: f64) {
        if let ParameterSet::Flat(map) = self {
            map.insert(key.to_string(), ParamValue::Number(value));
        }
    }

    /// Number of entries (keys or bands).
    pub fn len(&self) -> usize {
        match self {
            ParameterSet::Flat(map) => map.len(),
            ParameterSet::BandList(bands) => bands.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check shape, declared ranges and choices against the effect kind.
    pub fn validate(&self, kind: EffectKind, max_bands: usize) -> Result<(), ProjectError> {
        let invalid = |reason: String| ProjectError::InvalidParameters {
            effect: kind.id().to_string(),
            reason,
        };
        match (kind.uses_band_list(), self) {
            (true, ParameterSet::BandList(bands)) => {
                if bands.len() > max_bands {
                    return Err(ProjectError::BandLimit { limit: max_bands });
                }
                for (i, band) in bands.iter().enumerate() {
                    band.check().map_err(|reason| invalid(format!("band {i} {reason}")))?;
                }
                Ok(())
            }
            (false, ParameterSet::Flat(map)) => {
                let descriptor = kind.descriptor();
                for (key, value) in map {
                    let Some(spec) = descriptor.param(key) else {
                        return Err(invalid(format!("unknown parameter {key}")));
                    };
                    match (&spec.range, value) {
                        (ParamRange::Number { min, max, .. }, ParamValue::Number(v)) => {
                            if !(*v >= *min && *v <= *max) {
                                return Err(invalid(format!("{key} = {v} outside [{min}, {max}]")));
                            }
                        }
                        (ParamRange::Choice { options, .. }, ParamValue::Choice(v)) => {
                            if !options.contains(&v.as_str()) {
                                return Err(invalid(format!("{key} = {v} is not a valid choice")));
                            }
                        }
                        _ => return Err(invalid(format!("{key} has the wrong value type"))),
                    }
                }
                Ok(())
            }
            (true, ParameterSet::Flat(_)) => Err(invalid("expected a band list".into())),
            (false, ParameterSet::BandList(_)) => Err(invalid("expected named parameters".into())),
        }
    }
}

/// Reads a flat parameter set with descriptor fallbacks.
///
/// Missing or mistyped values fall back to the declared default with a
/// warning, and numbers are clamped to the declared range, so a malformed
/// bag degrades instead of failing the node.
pub struct ParamReader<'a> {
    kind: EffectKind,
    set: &'a ParameterSet,
}

impl<'a> ParamReader<'a> {
    pub fn new(kind: EffectKind, set: &'a ParameterSet) -> Self {
        ParamReader { kind, set }
    }

    pub fn num(&self, id: &str) -> f64 {
        let Some(spec) = self.kind.descriptor().param(id) else {
            log::warn!("{} has no parameter {id}", self.kind);
            return 0.0;
        };
        let ParamRange::Number { min, max, default, .. } = spec.range else {
            log::warn!("{}.{id} is not numeric", self.kind);
            return 0.0;
        };
        match self.set.number(id) {
            Some(v) if v.is_finite() => v.clamp(min, max),
            _ => {
                log::warn!("{}.{id} missing or not a number, using {default}", self.kind);
                default
            }
        }
    }

    pub fn choice(&self, id: &str) -> &'a str {
        let Some(spec) = self.kind.descriptor().param(id) else {
            log::warn!("{} has no parameter {id}", self.kind);
            return "";
        };
        let ParamRange::Choice { options, default } = spec.range else {
            log::warn!("{}.{id} is not a choice", self.kind);
            return "";
        };
        match self.set.choice(id) {
            Some(v) if options.contains(&v) => v,
            _ => {
                log::warn!("{}.{id} missing or invalid, using {default}", self.kind);
                default
            }
        }
    }

    pub fn filter_type(&self, id: &str) -> FilterType {
        FilterType::from_name(self.choice(id)).unwrap_or(FilterType::Peaking)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip() {
        for kind in EffectKind::ALL {
            assert_eq!(EffectKind::from_id(kind.id()), Some(kind));
            assert_eq!(kind.descriptor().id, kind.id());
        }
        assert_eq!(EffectKind::from_id("vocoder"), None);
    }

    #[test]
    fn defaults_validate() {
        for kind in EffectKind::ALL {
            let set = kind.default_parameters();
            set.validate(kind, 8).unwrap();
        }
    }

    #[test]
    fn parametric_eq_defaults_to_empty_band_list() {
        let set = EffectKind::ParametricEq.default_parameters();
        assert_eq!(set.bands().map(|b| b.len()), Some(0));
    }

    #[test]
    fn untagged_json_shapes() {
        let flat: ParameterSet =
            serde_json::from_str(r#"{ "time": 0.25, "feedback": 0.3, "mix": 0.5 }"#).unwrap();
        assert_eq!(flat.number("time"), Some(0.25));

        let bands: ParameterSet = serde_json::from_str(
            r#"[{ "type": "lowshelf", "freq": 120, "gain": 3, "q": 0.7 }, { "freq": 900 }]"#,
        )
        .unwrap();
        let list = bands.bands().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].filter_type, FilterType::Lowshelf);
        assert_eq!(list[1].filter_type, FilterType::Peaking);
        assert_eq!(list[1].q, 1.0);

        let choice: ParameterSet =
            serde_json::from_str(r#"{ "type": "notch", "frequency": 400 }"#).unwrap();
        assert_eq!(choice.choice("type"), Some("notch"));
    }

    #[test]
    fn validate_rejects_out_of_range_and_wrong_shape() {
        let mut set = EffectKind::Delay.default_parameters();
        set.set_number("feedback", 1.5);
        assert!(set.validate(EffectKind::Delay, 8).is_err());

        let bands = ParameterSet::BandList(vec![Band::peaking(1000.0, 0.0)]);
        assert!(bands.validate(EffectKind::Delay, 8).is_err());
        assert!(
            EffectKind::Delay
                .default_parameters()
                .validate(EffectKind::ParametricEq, 8)
                .is_err()
        );
    }

    #[test]
    fn validate_enforces_band_limit() {
        let bands = ParameterSet::BandList(vec![Band::peaking(1000.0, 0.0); 9]);
        assert_eq!(
            bands.validate(EffectKind::ParametricEq, 8),
            Err(ProjectError::BandLimit { limit: 8 })
        );
    }

    #[test]
    fn reader_falls_back_and_clamps() {
        let mut set = ParameterSet::Flat(BTreeMap::new());
        set.set_number("mix", 3.0);
        let reader = ParamReader::new(EffectKind::Delay, &set);
        assert_eq!(reader.num("mix"), 1.0);
        assert_eq!(reader.num("time"), 0.5);

        let reader = ParamReader::new(EffectKind::InfiniteFilter, &set);
        assert_eq!(reader.filter_type("type"), FilterType::Lowpass);
    }
}
