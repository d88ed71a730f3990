use super::config::AlertSettings;
use super::event::*;
use crate::types::{Proposal, ValIsActive, ValIsJail, ValRanking, ValSignMissed};

/// Problem records gathered during one poll cycle
#[derive(Debug, Clone, Default)]
pub struct Findings {
    pub jailed: Vec<ValIsJail>,
    pub inactive: Vec<ValIsActive>,
    pub missed: Vec<ValSignMissed>,
    pub ranking: Vec<ValRanking>,
    pub proposals: Vec<Proposal>,
}

impl Findings {
    pub fn is_empty(&self) -> bool {
        self.jailed.is_empty()
            && self.inactive.is_empty()
            && self.missed.is_empty()
            && self.ranking.is_empty()
            && self.proposals.is_empty()
    }
}

/// Builds notification text from findings using the configured thresholds
#[derive(Debug, Clone)]
pub struct Renderer {
    proportion: f64,
}

impl Renderer {
    pub fn new(settings: &AlertSettings) -> Self {
        Self {
            proportion: settings.proportion,
        }
    }

    /// Exceptions for every non-empty finding kind, in a fixed order
    pub fn classify(&self, findings: &Findings) -> Vec<Exception> {
        [
            parse_val_jailed_exception(&findings.jailed).map(Exception::from),
            parse_valis_active_exception(&findings.inactive).map(Exception::from),
            parse_sync_exception(&findings.missed, self.proportion).map(Exception::from),
            parse_valis_ranking_exception(&findings.ranking).map(Exception::from),
            parse_proposal_exception(&findings.proposals).map(Exception::from),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// One notification body, or `None` when nothing is worth sending
    pub fn render(&self, findings: &Findings) -> Option<String> {
        if findings.is_empty() {
            return None;
        }
        let body: String = self
            .classify(findings)
            .iter()
            .filter(|e| !e.is_empty())
            .map(Event::message)
            .collect();
        (!body.is_empty()).then_some(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nothing_to_render() {
        let renderer = Renderer::new(&AlertSettings::default());
        assert!(renderer.classify(&Findings::default()).is_empty());
        assert_eq!(renderer.render(&Findings::default()), None);
    }

    #[test]
    fn test_render_concatenates_in_order() {
        let renderer = Renderer::new(&AlertSettings::default().with_proportion(0.25));
        let findings = Findings {
            jailed: vec![ValIsJail {
                chain_name: "cosmos".into(),
                moniker: "X".into(),
                operator_addr: "cosmosvaloper1x".into(),
                block_height: 10,
            }],
            missed: vec![ValSignMissed {
                chain_name: "cosmos".into(),
                moniker: "X".into(),
                operator_addr: "cosmosvaloper1x".into(),
                block_height: 10,
            }],
            ..Default::default()
        };

        let exceptions = renderer.classify(&findings);
        assert_eq!(exceptions.len(), 2);
        assert!(matches!(exceptions[0], Exception::Jailed(_)));
        assert!(matches!(exceptions[1], Exception::Sync(_)));

        let body = renderer.render(&findings).unwrap();
        assert!(body.starts_with("Validator Jailed Exception\nThe cosmos' X validator has been jailed\nSync Exception \n"));
        assert!(body.contains("rate reaches 0.250000 at block height of 10. \n"));
    }
}
