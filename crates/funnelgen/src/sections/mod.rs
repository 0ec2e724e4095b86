//! Section identifiers, the section catalog, and the static dependency graph.

pub mod catalog;
pub mod graph;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use catalog::{ChunkSpec, SectionDescriptor, ValidationReport};
pub use graph::{DependencyGraph, DependencyGraphBuilder, GraphError};

/// A named unit of generated funnel content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SectionId {
    IdealClient,
    Message,
    Story,
    Offer,
    SalesScripts,
    SetterScript,
    LeadMagnet,
    Vsl,
    Emails,
    FacebookAds,
    FunnelCopy,
    ContentIdeas,
    #[serde(rename = "program12Month")]
    Program12Month,
    YoutubeShow,
    ContentPillars,
    Bio,
    Sms,
}

impl SectionId {
    /// All sections in generation order.
    pub const ALL: [SectionId; 17] = [
        SectionId::IdealClient,
        SectionId::Message,
        SectionId::Story,
        SectionId::Offer,
        SectionId::SalesScripts,
        SectionId::SetterScript,
        SectionId::LeadMagnet,
        SectionId::Vsl,
        SectionId::Emails,
        SectionId::FacebookAds,
        SectionId::FunnelCopy,
        SectionId::ContentIdeas,
        SectionId::Program12Month,
        SectionId::YoutubeShow,
        SectionId::ContentPillars,
        SectionId::Bio,
        SectionId::Sms,
    ];

    /// The wire key used in storage and prompts.
    pub fn as_str(&self) -> &'static str {
        match self {
            SectionId::IdealClient => "idealClient",
            SectionId::Message => "message",
            SectionId::Story => "story",
            SectionId::Offer => "offer",
            SectionId::SalesScripts => "salesScripts",
            SectionId::SetterScript => "setterScript",
            SectionId::LeadMagnet => "leadMagnet",
            SectionId::Vsl => "vsl",
            SectionId::Emails => "emails",
            SectionId::FacebookAds => "facebookAds",
            SectionId::FunnelCopy => "funnelCopy",
            SectionId::ContentIdeas => "contentIdeas",
            SectionId::Program12Month => "program12Month",
            SectionId::YoutubeShow => "youtubeShow",
            SectionId::ContentPillars => "contentPillars",
            SectionId::Bio => "bio",
            SectionId::Sms => "sms",
        }
    }

    /// Legacy ordinal (1-based, generation order).
    pub fn numeric_key(&self) -> u32 {
        Self::ALL
            .iter()
            .position(|s| s == self)
            .map(|i| i as u32 + 1)
            .unwrap_or(0)
    }

    /// Display grouping, 1..=3.
    pub fn phase(&self) -> u8 {
        match self.numeric_key() {
            1..=4 => 1,
            5..=8 => 2,
            _ => 3,
        }
    }

    /// Looks up a section by its legacy ordinal.
    pub fn from_numeric_key(key: u32) -> Option<Self> {
        key.checked_sub(1)
            .and_then(|i| Self::ALL.get(i as usize))
            .copied()
    }

    /// Parses a wire key, returning `None` for unknown sections.
    pub fn parse(key: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.as_str() == key)
    }
}

impl fmt::Display for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a wire key names no known section.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown section: {0}")]
pub struct UnknownSection(pub String);

impl FromStr for SectionId {
    type Err = UnknownSection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| UnknownSection(s.to_string()))
    }
}

/// Lifecycle status of a section version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionStatus {
    Generating,
    Generated,
    Approved,
    NeedsRevision,
    Failed,
}

impl SectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SectionStatus::Generating => "generating",
            SectionStatus::Generated => "generated",
            SectionStatus::Approved => "approved",
            SectionStatus::NeedsRevision => "needs_revision",
            SectionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "generating" => Some(SectionStatus::Generating),
            "generated" => Some(SectionStatus::Generated),
            "approved" => Some(SectionStatus::Approved),
            "needs_revision" => Some(SectionStatus::NeedsRevision),
            "failed" => Some(SectionStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for SectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_keys_are_sequential() {
        for (i, section) in SectionId::ALL.iter().enumerate() {
            assert_eq!(section.numeric_key(), i as u32 + 1);
            assert_eq!(SectionId::from_numeric_key(i as u32 + 1), Some(*section));
        }
        assert_eq!(SectionId::from_numeric_key(0), None);
        assert_eq!(SectionId::from_numeric_key(18), None);
    }

    #[test]
    fn test_wire_keys_round_trip_through_serde() {
        for section in SectionId::ALL {
            let json = serde_json::to_string(&section).unwrap();
            assert_eq!(json, format!("\"{}\"", section.as_str()));
            assert_eq!(section.as_str().parse::<SectionId>().unwrap(), section);
        }
    }

    #[test]
    fn test_unknown_key() {
        assert!(SectionId::parse("landingPage").is_none());
        let err = "landingPage".parse::<SectionId>().unwrap_err();
        assert_eq!(err.to_string(), "Unknown section: landingPage");
    }

    #[test]
    fn test_phases() {
        assert_eq!(SectionId::IdealClient.phase(), 1);
        assert_eq!(SectionId::Offer.phase(), 1);
        assert_eq!(SectionId::LeadMagnet.phase(), 2);
        assert_eq!(SectionId::Emails.phase(), 3);
        assert_eq!(SectionId::Sms.phase(), 3);
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(
            SectionStatus::parse("needs_revision"),
            Some(SectionStatus::NeedsRevision)
        );
        assert_eq!(SectionStatus::parse("bogus"), None);
        assert_eq!(SectionStatus::Approved.to_string(), "approved");
    }
}
