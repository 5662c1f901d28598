//! Per-class dispatch: which detector runs on a stem, and with what parameters.

use crate::config::{DrumMode, MelodyMode, ParamsTable, Settings, TrackParams};
use crate::refine::MergeVelocity;
use crate::types::InstrumentClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorKind {
    DrumOnsets,
    Neural,
    Monophonic,
    /// The class is not transcribed; the track comes back empty.
    Skip,
}

/// A detector choice with the parameters it runs under.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub detector: DetectorKind,
    pub params: TrackParams,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub class: InstrumentClass,
    pub track_name: String,
    pub primary: Step,
    /// Tried when the primary detector fails.
    pub fallback: Option<Step>,
    pub merge_velocity: MergeVelocity,
}

impl Route {
    pub fn is_skipped(&self) -> bool {
        self.primary.detector == DetectorKind::Skip
    }
}

#[derive(Debug, Clone)]
pub struct TrackRouter {
    params: ParamsTable,
    drum_mode: DrumMode,
    melody_mode: MelodyMode,
}

impl Default for TrackRouter {
    fn default() -> Self {
        Self::new(ParamsTable::default(), DrumMode::default(), MelodyMode::default())
    }
}

impl TrackRouter {
    pub fn new(params: ParamsTable, drum_mode: DrumMode, melody_mode: MelodyMode) -> Self {
        Self {
            params,
            drum_mode,
            melody_mode,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.params.clone(), settings.drum_mode, settings.melody_mode)
    }

    pub fn params(&self) -> &ParamsTable {
        &self.params
    }

    pub fn route(&self, class: InstrumentClass) -> Route {
        let params = self.params.get(class).clone();
        let step = |detector: DetectorKind, params: TrackParams| Step { detector, params };

        let (primary, fallback, merge_velocity) = match class {
            _ if params.skip => (step(DetectorKind::Skip, params), None, MergeVelocity::Mean),
            InstrumentClass::Drums => match self.drum_mode {
                DrumMode::Onsets => (step(DetectorKind::DrumOnsets, params), None, MergeVelocity::Max),
                DrumMode::Skip => (step(DetectorKind::Skip, params), None, MergeVelocity::Max),
            },
            InstrumentClass::Bass | InstrumentClass::Other => {
                (step(DetectorKind::Neural, params), None, MergeVelocity::Mean)
            }
            InstrumentClass::Vocals => {
                let neural = step(DetectorKind::Neural, self.params.vocals_neural.clone());
                match self.melody_mode {
                    MelodyMode::Monophonic => {
                        (step(DetectorKind::Monophonic, params), Some(neural), MergeVelocity::Max)
                    }
                    MelodyMode::Neural => (neural, None, MergeVelocity::Mean),
                }
            }
        };

        Route {
            class,
            track_name: class.track_name().to_string(),
            primary,
            fallback,
            merge_velocity,
        }
    }

    /// Route a stem by name. Unknown names are transcribed like `other`
    /// under their own track name.
    pub fn route_by_name(&self, name: &str) -> Route {
        match InstrumentClass::from_name(name) {
            Some(class) => self.route(class),
            None => Route {
                track_name: name.trim().to_ascii_lowercase(),
                ..self.route(InstrumentClass::Other)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_routes() {
        let router = TrackRouter::default();
        assert_eq!(router.route(InstrumentClass::Drums).primary.detector, DetectorKind::DrumOnsets);
        assert_eq!(router.route(InstrumentClass::Bass).primary.params, ParamsTable::BASS);
        assert_eq!(router.route(InstrumentClass::Other).primary.detector, DetectorKind::Neural);

        let melody = router.route(InstrumentClass::Vocals);
        assert_eq!(melody.track_name, "melody");
        assert_eq!(melody.primary.detector, DetectorKind::Monophonic);
        assert_eq!(melody.merge_velocity, MergeVelocity::Max);
        let fallback = melody.fallback.unwrap();
        assert_eq!(fallback.detector, DetectorKind::Neural);
        assert_eq!(fallback.params, ParamsTable::VOCALS_NEURAL);
    }

    #[test]
    fn test_unknown_name_uses_other_params() {
        let router = TrackRouter::default();
        let route = router.route_by_name("Kazoo");
        assert_eq!(route.class, InstrumentClass::Other);
        assert_eq!(route.track_name, "kazoo");
        assert_eq!(route.primary.params, ParamsTable::OTHER);
        assert_eq!(router.route_by_name("vocals").track_name, "melody");
    }

    #[test]
    fn test_modes() {
        let router = TrackRouter::new(ParamsTable::default(), DrumMode::Skip, MelodyMode::Neural);
        assert!(router.route(InstrumentClass::Drums).is_skipped());

        let melody = router.route(InstrumentClass::Vocals);
        assert_eq!(melody.primary.detector, DetectorKind::Neural);
        assert_eq!(melody.primary.params, ParamsTable::VOCALS_NEURAL);
        assert!(melody.fallback.is_none());
    }

    #[test]
    fn test_skip_flag() {
        let mut params = ParamsTable::default();
        params.bass.skip = true;
        let router = TrackRouter::new(params, DrumMode::Onsets, MelodyMode::Monophonic);
        assert!(router.route(InstrumentClass::Bass).is_skipped());
        assert!(!router.route(InstrumentClass::Other).is_skipped());
    }
}
