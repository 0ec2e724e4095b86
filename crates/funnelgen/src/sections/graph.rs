//! Static dependency graph between sections.
//!
//! Holds which sections a section reads before it is generated (upstream),
//! which sections must be re-checked when it changes (downstream), and which
//! fields of a section are atomic: short literal values that are safe to
//! propagate by find-and-replace instead of regeneration.
//!
//! The graph is an immutable value built once and shared behind an `Arc`.
//! Unknown sections have no edges; queries never fail.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use thiserror::Error;

use super::SectionId;

/// Errors raised while building a graph.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("Section {0} cannot depend on itself")]
    SelfDependency(SectionId),

    #[error("Dependency cycle detected: {}", format_path(.0))]
    Cycle(Vec<SectionId>),
}

fn format_path(path: &[SectionId]) -> String {
    path.iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    upstream: HashMap<SectionId, Vec<SectionId>>,
    downstream: HashMap<SectionId, Vec<SectionId>>,
    atomic_fields: HashMap<SectionId, Vec<String>>,
}

impl DependencyGraph {
    pub fn builder() -> DependencyGraphBuilder {
        DependencyGraphBuilder::default()
    }

    /// The funnel's standard dependency table.
    pub fn standard() -> Self {
        use SectionId::*;

        let mut builder = Self::builder();
        builder
            .reads(Message, &[IdealClient])
            .reads(Story, &[IdealClient, Message])
            .reads(Offer, &[IdealClient, Message, Story])
            .reads(SalesScripts, &[IdealClient, Message, Offer])
            .reads(SetterScript, &[IdealClient, Message, Offer])
            .reads(LeadMagnet, &[IdealClient, Message])
            .reads(Vsl, &[IdealClient, Message, Story, Offer, LeadMagnet])
            .reads(Emails, &[IdealClient, Message, Story, Offer, LeadMagnet])
            .reads(FacebookAds, &[IdealClient, Message, LeadMagnet])
            .reads(FunnelCopy, &[IdealClient, Message, Story, Offer, LeadMagnet])
            .reads(ContentIdeas, &[IdealClient, Message, Story])
            .reads(Program12Month, &[IdealClient, Offer])
            .reads(YoutubeShow, &[IdealClient, Message])
            .reads(ContentPillars, &[IdealClient, Message])
            .reads(Bio, &[Message, Story])
            .reads(Sms, &[Offer, LeadMagnet])
            .atomic_fields(Message, &["signatureMethodName"])
            .atomic_fields(Offer, &["offerName", "programName", "price"])
            .atomic_fields(LeadMagnet, &["title"])
            .atomic_fields(FunnelCopy, &["optinPage.headline_text"]);

        // The table above is acyclic; see `test_standard_graph_is_acyclic`.
        builder.assemble()
    }

    /// Sections whose content must be resolved before generating `section`.
    pub fn upstream_of(&self, section: SectionId) -> &[SectionId] {
        self.upstream.get(&section).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Sections to re-check after `section` changes.
    pub fn downstream_of(&self, section: SectionId) -> &[SectionId] {
        self.downstream
            .get(&section)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Same as [`downstream_of`](Self::downstream_of) but keyed by wire key.
    /// Unknown keys have no dependents.
    pub fn downstream_of_key(&self, key: &str) -> &[SectionId] {
        SectionId::parse(key)
            .map(|s| self.downstream_of(s))
            .unwrap_or(&[])
    }

    /// Declared atomic field paths for `section`.
    pub fn atomic_fields(&self, section: SectionId) -> &[String] {
        self.atomic_fields
            .get(&section)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Exact-or-suffix match of `field_path` against the declared atomic
    /// fields. `details.offerName` matches a declared `offerName`; a suffix
    /// must start at a path segment boundary.
    pub fn is_atomic_field(&self, section: SectionId, field_path: &str) -> bool {
        self.atomic_fields(section).iter().any(|declared| {
            field_path == declared
                || field_path
                    .strip_suffix(declared.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }
}

/// Builder for [`DependencyGraph`]. Reverse edges are derived from the
/// upstream table unless an edge is declared untracked.
#[derive(Debug, Default)]
pub struct DependencyGraphBuilder {
    upstream: BTreeMap<SectionId, Vec<SectionId>>,
    untracked: BTreeSet<(SectionId, SectionId)>,
    atomic_fields: BTreeMap<SectionId, Vec<String>>,
}

impl DependencyGraphBuilder {
    /// `section` reads `sources` and is notified when any of them changes.
    pub fn reads(&mut self, section: SectionId, sources: &[SectionId]) -> &mut Self {
        let entry = self.upstream.entry(section).or_default();
        for source in sources {
            if !entry.contains(source) {
                entry.push(*source);
            }
        }
        self
    }

    /// `section` reads `sources` but is not notified when they change.
    pub fn reads_untracked(&mut self, section: SectionId, sources: &[SectionId]) -> &mut Self {
        self.reads(section, sources);
        for source in sources {
            self.untracked.insert((*source, section));
        }
        self
    }

    pub fn atomic_fields(&mut self, section: SectionId, fields: &[&str]) -> &mut Self {
        let entry = self.atomic_fields.entry(section).or_default();
        entry.extend(fields.iter().map(|f| f.to_string()));
        self
    }

    /// Validates the graph is a DAG and builds it.
    pub fn build(&self) -> Result<DependencyGraph, GraphError> {
        self.validate()?;
        Ok(self.assemble())
    }

    fn validate(&self) -> Result<(), GraphError> {
        for (section, sources) in &self.upstream {
            if sources.contains(section) {
                return Err(GraphError::SelfDependency(*section));
            }
        }

        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit(
            node: SectionId,
            upstream: &BTreeMap<SectionId, Vec<SectionId>>,
            marks: &mut HashMap<SectionId, Mark>,
            path: &mut Vec<SectionId>,
        ) -> Result<(), GraphError> {
            match marks.get(&node) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => {
                    let start = path.iter().position(|s| *s == node).unwrap_or(0);
                    let mut cycle = path[start..].to_vec();
                    cycle.push(node);
                    return Err(GraphError::Cycle(cycle));
                }
                None => {}
            }

            marks.insert(node, Mark::Visiting);
            path.push(node);
            for next in upstream.get(&node).into_iter().flatten() {
                visit(*next, upstream, marks, path)?;
            }
            path.pop();
            marks.insert(node, Mark::Done);
            Ok(())
        }

        let mut marks = HashMap::new();
        for section in self.upstream.keys() {
            visit(*section, &self.upstream, &mut marks, &mut Vec::new())?;
        }
        Ok(())
    }

    fn assemble(&self) -> DependencyGraph {
        let mut downstream: HashMap<SectionId, Vec<SectionId>> = HashMap::new();
        for (section, sources) in &self.upstream {
            for source in sources {
                if self.untracked.contains(&(*source, *section)) {
                    continue;
                }
                downstream.entry(*source).or_default().push(*section);
            }
        }
        for dependents in downstream.values_mut() {
            dependents.sort_by_key(SectionId::numeric_key);
            dependents.dedup();
        }

        DependencyGraph {
            upstream: self
                .upstream
                .iter()
                .map(|(k, v)| (*k, v.clone()))
                .collect(),
            downstream,
            atomic_fields: self
                .atomic_fields
                .iter()
                .map(|(k, v)| (*k, v.clone()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SectionId::*;

    #[test]
    fn test_standard_graph_is_acyclic() {
        let graph = DependencyGraph::standard();
        assert!(!graph.upstream.is_empty());

        let mut builder = DependencyGraph::builder();
        for (section, sources) in &graph.upstream {
            builder.reads(*section, sources);
        }
        assert!(builder.build().is_ok());
    }

    #[test]
    fn test_upstream_of() {
        let graph = DependencyGraph::standard();
        assert_eq!(graph.upstream_of(Story), &[IdealClient, Message]);
        assert!(graph.upstream_of(IdealClient).is_empty());
    }

    #[test]
    fn test_downstream_is_reverse_of_upstream() {
        let graph = DependencyGraph::standard();
        let offer_dependents = graph.downstream_of(Offer);
        for dependent in [SalesScripts, SetterScript, Vsl, Emails, FunnelCopy, Program12Month, Sms]
        {
            assert!(offer_dependents.contains(&dependent), "{dependent}");
        }
        assert!(!offer_dependents.contains(&Offer));
        assert!(graph.downstream_of(Sms).is_empty());
    }

    #[test]
    fn test_downstream_sorted_by_generation_order() {
        let graph = DependencyGraph::standard();
        let keys: Vec<u32> = graph
            .downstream_of(IdealClient)
            .iter()
            .map(SectionId::numeric_key)
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn test_unknown_key_has_no_dependents() {
        let graph = DependencyGraph::standard();
        assert!(graph.downstream_of_key("notASection").is_empty());
        assert_eq!(graph.downstream_of_key("bio"), graph.downstream_of(Bio));
    }

    #[test]
    fn test_is_atomic_field_exact_and_suffix() {
        let graph = DependencyGraph::standard();
        assert!(graph.is_atomic_field(Offer, "offerName"));
        assert!(graph.is_atomic_field(Offer, "details.offerName"));
        assert!(!graph.is_atomic_field(Offer, "detailsofferName"));
        assert!(!graph.is_atomic_field(Offer, "offerNameLong"));
        assert!(!graph.is_atomic_field(Offer, "description"));
        assert!(graph.is_atomic_field(FunnelCopy, "optinPage.headline_text"));
        assert!(!graph.is_atomic_field(FunnelCopy, "headline_text"));
        assert!(!graph.is_atomic_field(Emails, "offerName"));
    }

    #[test]
    fn test_untracked_edge_is_not_reversed() {
        let graph = DependencyGraph::builder()
            .reads(Story, &[Message])
            .reads_untracked(Story, &[IdealClient])
            .build()
            .unwrap();
        assert_eq!(graph.upstream_of(Story), &[Message, IdealClient]);
        assert_eq!(graph.downstream_of(Message), &[Story]);
        assert!(graph.downstream_of(IdealClient).is_empty());
    }

    #[test]
    fn test_cycle_rejected() {
        let err = DependencyGraph::builder()
            .reads(Message, &[IdealClient])
            .reads(IdealClient, &[Story])
            .reads(Story, &[Message])
            .build()
            .unwrap_err();
        match err {
            GraphError::Cycle(path) => {
                assert_eq!(path.first(), path.last());
                assert!(path.len() >= 4);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_self_dependency_rejected() {
        let err = DependencyGraph::builder()
            .reads(Offer, &[Offer])
            .build()
            .unwrap_err();
        assert_eq!(err, GraphError::SelfDependency(Offer));
    }
}
