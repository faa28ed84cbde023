//! Quality tier adaptation
//!
//! Emulates an adaptive-bitrate switch by constraining the raw video
//! dimensions after the scaler and asking the scaler to renegotiate.

use crate::{
    engine::PropertyValue,
    graph::PipelineGraph,
    types::*,
    Result,
};
use tracing::{info, instrument, warn};

/// Property on the constraint filter holding the dimension constraint
pub const CONSTRAINT_PROPERTY: &str = "caps";

/// Toggles the session's quality tier
#[derive(Debug, Clone)]
pub struct QualityController {
    tier: QualityTier,
    reduced: Resolution,
}

impl QualityController {
    pub fn new(reduced: Resolution) -> Self {
        Self {
            tier: QualityTier::Full,
            reduced,
        }
    }

    pub fn tier(&self) -> QualityTier {
        self.tier
    }

    /// Pause, flip the constraint, renegotiate, resume.
    ///
    /// The graph always ends up Playing, even if it was paused before the
    /// toggle. A constraint the filter rejects leaves the tier unchanged.
    /// Renegotiation is fire-and-forget: a constraint the downstream cannot
    /// honour is not reported here.
    #[instrument(skip_all, fields(from = %self.tier))]
    pub fn toggle(&mut self, graph: &PipelineGraph) -> Result<QualityTier> {
        if let Err(e) = graph.set_state(PlaybackState::Paused) {
            warn!(error = %e, "Pause before quality change rejected");
        }

        let topology = graph.topology();
        let (next, constraint) = match self.tier {
            QualityTier::Full => (QualityTier::Reduced, Some(self.reduced)),
            QualityTier::Reduced => (QualityTier::Full, None),
        };

        match graph.engine().set_property(
            topology.video_filter.id,
            CONSTRAINT_PROPERTY,
            PropertyValue::Dimensions(constraint),
        ) {
            Ok(()) => {
                graph.engine().request_renegotiation(topology.video_scaler.id);
                self.tier = next;
                match constraint {
                    Some(res) => info!(tier = %next, resolution = %res, "Quality tier changed"),
                    None => info!(tier = %next, "Quality tier changed"),
                }
            }
            Err(e) => warn!(error = %e, tier = %self.tier, "Constraint rejected, tier unchanged"),
        }

        graph.set_state(PlaybackState::Playing)?;
        Ok(self.tier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{MediaSource, PlayerConfig},
        engine::Engine,
        sim::SimEngine,
        sink::{Platform, SinkSelector},
    };
    use std::sync::Arc;

    fn graph(engine: &Arc<SimEngine>) -> PipelineGraph {
        PipelineGraph::build(
            engine.clone(),
            &MediaSource::new("/media/a.mp4"),
            &PlayerConfig::default(),
            &SinkSelector::new(Platform::Other, None),
        )
        .unwrap()
    }

    #[test]
    fn test_toggle_sets_and_clears_constraint() {
        let engine = SimEngine::shared();
        let graph = graph(&engine);
        let mut quality = QualityController::new(Resolution::REDUCED);

        assert_eq!(quality.toggle(&graph).unwrap(), QualityTier::Reduced);
        assert_eq!(
            engine.property("vcaps", CONSTRAINT_PROPERTY),
            Some(PropertyValue::Dimensions(Some(Resolution::new(640, 360))))
        );

        assert_eq!(quality.toggle(&graph).unwrap(), QualityTier::Full);
        assert_eq!(
            engine.property("vcaps", CONSTRAINT_PROPERTY),
            Some(PropertyValue::Dimensions(None))
        );
        assert_eq!(engine.renegotiation_count(), 2);
    }

    #[test]
    fn test_toggle_pauses_then_plays() {
        let engine = SimEngine::shared();
        let graph = graph(&engine);
        let mut quality = QualityController::new(Resolution::REDUCED);
        quality.toggle(&graph).unwrap();

        let requested: Vec<PlaybackState> = engine.state_requests().into_iter().map(|(_, s)| s).collect();
        assert_eq!(requested, vec![PlaybackState::Paused, PlaybackState::Playing]);
        assert_eq!(engine.current_state(), PlaybackState::Playing);
    }

    #[test]
    fn test_rejected_constraint_keeps_tier_and_still_plays() {
        let engine = SimEngine::shared();
        engine.fail_property("vcaps", CONSTRAINT_PROPERTY);
        let graph = graph(&engine);
        let mut quality = QualityController::new(Resolution::REDUCED);

        assert_eq!(quality.toggle(&graph).unwrap(), QualityTier::Full);
        assert_eq!(quality.tier(), QualityTier::Full);
        assert_eq!(engine.renegotiation_count(), 0);
        assert_eq!(engine.current_state(), PlaybackState::Playing);
    }
}
