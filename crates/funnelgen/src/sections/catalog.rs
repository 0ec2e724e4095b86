//! Per-section descriptors: expected shape, chunk layout, merge and validation.
//!
//! Every [`SectionId`] has exactly one static [`SectionDescriptor`]. Sections
//! with a non-empty chunk list are generated as parallel sub-generations and
//! merged by key ownership: each chunk owns a fixed set of top-level keys and
//! only those keys are taken from its output.

use serde_json::{Map, Value};

use super::SectionId;

/// One parallel sub-generation of a chunked section.
#[derive(Debug)]
pub struct ChunkSpec {
    pub name: &'static str,
    /// Top-level keys this chunk produces.
    pub keys: &'static [&'static str],
    pub instructions: &'static str,
}

/// Outcome of a structural validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub valid: bool,
    pub issues: Vec<String>,
}

impl ValidationReport {
    fn from_issues(issues: Vec<String>) -> Self {
        Self {
            valid: issues.is_empty(),
            issues,
        }
    }
}

type Validator = fn(&SectionDescriptor, &Value) -> ValidationReport;

pub struct SectionDescriptor {
    pub id: SectionId,
    pub title: &'static str,
    /// Role text used as the system prompt.
    pub role: &'static str,
    /// Top-level keys the finished document must contain.
    pub required_keys: &'static [&'static str],
    /// Empty for single-shot sections.
    pub chunks: &'static [ChunkSpec],
    validator: Validator,
}

impl std::fmt::Debug for SectionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SectionDescriptor")
            .field("id", &self.id)
            .field("required_keys", &self.required_keys)
            .field("chunks", &self.chunks.len())
            .finish()
    }
}

impl SectionDescriptor {
    pub fn for_section(id: SectionId) -> &'static SectionDescriptor {
        match id {
            SectionId::IdealClient => &IDEAL_CLIENT,
            SectionId::Message => &MESSAGE,
            SectionId::Story => &STORY,
            SectionId::Offer => &OFFER,
            SectionId::SalesScripts => &SALES_SCRIPTS,
            SectionId::SetterScript => &SETTER_SCRIPT,
            SectionId::LeadMagnet => &LEAD_MAGNET,
            SectionId::Vsl => &VSL,
            SectionId::Emails => &EMAILS,
            SectionId::FacebookAds => &FACEBOOK_ADS,
            SectionId::FunnelCopy => &FUNNEL_COPY,
            SectionId::ContentIdeas => &CONTENT_IDEAS,
            SectionId::Program12Month => &PROGRAM_12_MONTH,
            SectionId::YoutubeShow => &YOUTUBE_SHOW,
            SectionId::ContentPillars => &CONTENT_PILLARS,
            SectionId::Bio => &BIO,
            SectionId::Sms => &SMS,
        }
    }

    pub fn is_chunked(&self) -> bool {
        !self.chunks.is_empty()
    }

    /// Merges chunk outputs (index-aligned with `chunks`) into the section
    /// document. `None` or non-object outputs contribute nothing, and a
    /// chunk never contributes keys owned by another chunk.
    pub fn merge(&self, outputs: &[Option<Value>]) -> Value {
        let mut merged = Map::new();
        for (spec, output) in self.chunks.iter().zip(outputs) {
            let Some(Value::Object(map)) = output else {
                continue;
            };
            for key in spec.keys {
                if let Some(value) = map.get(*key) {
                    merged.insert((*key).to_string(), value.clone());
                }
            }
        }
        Value::Object(merged)
    }

    pub fn validate(&self, content: &Value) -> ValidationReport {
        (self.validator)(self, content)
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

fn required_key_issues(descriptor: &SectionDescriptor, content: &Value) -> Vec<String> {
    let Some(map) = content.as_object() else {
        return vec![format!("{} content is not an object", descriptor.id)];
    };
    descriptor
        .required_keys
        .iter()
        .filter_map(|key| match map.get(*key) {
            None => Some(format!("missing key '{}'", key)),
            Some(v) if is_blank(v) => Some(format!("empty value for '{}'", key)),
            Some(_) => None,
        })
        .collect()
}

fn validate_required_keys(descriptor: &SectionDescriptor, content: &Value) -> ValidationReport {
    ValidationReport::from_issues(required_key_issues(descriptor, content))
}

fn validate_emails(descriptor: &SectionDescriptor, content: &Value) -> ValidationReport {
    let mut issues = required_key_issues(descriptor, content);
    for key in descriptor.required_keys {
        let Some(email) = content.get(*key) else {
            continue;
        };
        for part in ["subject", "body"] {
            if email.get(part).map(is_blank).unwrap_or(true) {
                issues.push(format!("{} has no {}", key, part));
            }
        }
    }
    ValidationReport::from_issues(issues)
}

fn validate_funnel_copy(descriptor: &SectionDescriptor, content: &Value) -> ValidationReport {
    let mut issues = required_key_issues(descriptor, content);
    if let Some(optin) = content.get("optinPage") {
        if optin.get("headline_text").map(is_blank).unwrap_or(true) {
            issues.push("optinPage has no headline_text".to_string());
        }
    }
    ValidationReport::from_issues(issues)
}

static IDEAL_CLIENT: SectionDescriptor = SectionDescriptor {
    id: SectionId::IdealClient,
    title: "Ideal Client Profile",
    role: "You are a direct-response strategist who profiles the single best-fit client for a coaching or service business.",
    required_keys: &["bestIdealClient", "demographics", "challenges", "desires"],
    chunks: &[],
    validator: validate_required_keys,
};

static MESSAGE: SectionDescriptor = SectionDescriptor {
    id: SectionId::Message,
    title: "Message",
    role: "You are a positioning expert who distills a business into one clear, memorable message.",
    required_keys: &["oneLineMessage", "signatureMethodName", "coreMessage"],
    chunks: &[],
    validator: validate_required_keys,
};

static STORY: SectionDescriptor = SectionDescriptor {
    id: SectionId::Story,
    title: "Signature Story",
    role: "You are a story coach who shapes a founder's journey into a persuasive signature story.",
    required_keys: &["summary", "lowMoment", "breakthrough", "signatureStory"],
    chunks: &[],
    validator: validate_required_keys,
};

static OFFER: SectionDescriptor = SectionDescriptor {
    id: SectionId::Offer,
    title: "Offer",
    role: "You are an offer architect who packages expertise into an irresistible premium program.",
    required_keys: &["offerName", "programName", "price", "deliverables", "guarantee"],
    chunks: &[],
    validator: validate_required_keys,
};

static SALES_SCRIPTS: SectionDescriptor = SectionDescriptor {
    id: SectionId::SalesScripts,
    title: "Sales Scripts",
    role: "You are a high-ticket sales trainer who writes natural, consultative sales call scripts.",
    required_keys: &[
        "opening",
        "discoveryQuestions",
        "offerPresentation",
        "objectionHandling",
        "close",
    ],
    chunks: &[
        ChunkSpec {
            name: "discovery",
            keys: &["opening", "discoveryQuestions"],
            instructions: "Write the call opening and the discovery question sequence.",
        },
        ChunkSpec {
            name: "closing",
            keys: &["offerPresentation", "objectionHandling", "close"],
            instructions: "Write the offer presentation, objection handling and the close.",
        },
    ],
    validator: validate_required_keys,
};

static SETTER_SCRIPT: SectionDescriptor = SectionDescriptor {
    id: SectionId::SetterScript,
    title: "Setter Script",
    role: "You are an appointment-setting coach who writes short qualifying conversations.",
    required_keys: &["opener", "qualifyingQuestions", "booking"],
    chunks: &[],
    validator: validate_required_keys,
};

static LEAD_MAGNET: SectionDescriptor = SectionDescriptor {
    id: SectionId::LeadMagnet,
    title: "Free Gift",
    role: "You are a lead-generation strategist who designs a high-value free gift.",
    required_keys: &["title", "subtitle", "format", "outline"],
    chunks: &[],
    validator: validate_required_keys,
};

static VSL: SectionDescriptor = SectionDescriptor {
    id: SectionId::Vsl,
    title: "Video Sales Letter",
    role: "You are a video sales letter copywriter.",
    required_keys: &["hook", "problem", "story", "mechanism", "offer", "callToAction"],
    chunks: &[
        ChunkSpec {
            name: "hook",
            keys: &["hook", "problem"],
            instructions: "Write the opening hook and the problem agitation.",
        },
        ChunkSpec {
            name: "story",
            keys: &["story", "mechanism"],
            instructions: "Write the story segment and the unique mechanism reveal.",
        },
        ChunkSpec {
            name: "offer",
            keys: &["offer", "callToAction"],
            instructions: "Write the offer stack and the call to action.",
        },
    ],
    validator: validate_required_keys,
};

static EMAILS: SectionDescriptor = SectionDescriptor {
    id: SectionId::Emails,
    title: "Email Sequence",
    role: "You are an email copywriter who writes a 15-day nurture sequence. Every email has a subject, preview and body.",
    required_keys: &[
        "email1", "email2", "email3", "email4", "email5", "email6", "email7", "email8", "email9",
        "email10", "email11", "email12", "email13", "email14", "email15",
    ],
    chunks: &[
        ChunkSpec {
            name: "emails 1-4",
            keys: &["email1", "email2", "email3", "email4"],
            instructions: "Write emails 1 to 4: welcome, free gift delivery and the origin story.",
        },
        ChunkSpec {
            name: "emails 5-8",
            keys: &["email5", "email6", "email7", "email8"],
            instructions: "Write emails 5 to 8: teaching emails built on the core message.",
        },
        ChunkSpec {
            name: "emails 9-12",
            keys: &["email9", "email10", "email11", "email12"],
            instructions: "Write emails 9 to 12: proof, objections and the offer introduction.",
        },
        ChunkSpec {
            name: "emails 13-15",
            keys: &["email13", "email14", "email15"],
            instructions: "Write emails 13 to 15: urgency and the final invitation to book a call.",
        },
    ],
    validator: validate_emails,
};

static FACEBOOK_ADS: SectionDescriptor = SectionDescriptor {
    id: SectionId::FacebookAds,
    title: "Facebook Ads",
    role: "You are a paid-social copywriter who writes scroll-stopping ads for a free gift.",
    required_keys: &["ads"],
    chunks: &[],
    validator: validate_required_keys,
};

static FUNNEL_COPY: SectionDescriptor = SectionDescriptor {
    id: SectionId::FunnelCopy,
    title: "Funnel Copy",
    role: "You are a funnel copywriter who writes page copy for an opt-in funnel.",
    required_keys: &["optinPage", "thankYouPage", "salesPage", "calendarPage"],
    chunks: &[
        ChunkSpec {
            name: "optin page",
            keys: &["optinPage"],
            instructions: "Write the opt-in page. Include headline_text, subheadline_text and bullets.",
        },
        ChunkSpec {
            name: "thank you page",
            keys: &["thankYouPage"],
            instructions: "Write the thank-you page shown after opt-in.",
        },
        ChunkSpec {
            name: "sales page",
            keys: &["salesPage"],
            instructions: "Write the long-form sales page for the offer.",
        },
        ChunkSpec {
            name: "calendar page",
            keys: &["calendarPage"],
            instructions: "Write the booking calendar page.",
        },
    ],
    validator: validate_funnel_copy,
};

static CONTENT_IDEAS: SectionDescriptor = SectionDescriptor {
    id: SectionId::ContentIdeas,
    title: "Content Ideas",
    role: "You are a content strategist.",
    required_keys: &["ideas"],
    chunks: &[],
    validator: validate_required_keys,
};

static PROGRAM_12_MONTH: SectionDescriptor = SectionDescriptor {
    id: SectionId::Program12Month,
    title: "12-Month Program",
    role: "You are a curriculum designer who maps a premium offer onto a 12-month journey.",
    required_keys: &["months"],
    chunks: &[],
    validator: validate_required_keys,
};

static YOUTUBE_SHOW: SectionDescriptor = SectionDescriptor {
    id: SectionId::YoutubeShow,
    title: "YouTube Show",
    role: "You are a YouTube show producer.",
    required_keys: &["showName", "episodes"],
    chunks: &[],
    validator: validate_required_keys,
};

static CONTENT_PILLARS: SectionDescriptor = SectionDescriptor {
    id: SectionId::ContentPillars,
    title: "Content Pillars",
    role: "You are a brand strategist who defines content pillars.",
    required_keys: &["pillars"],
    chunks: &[],
    validator: validate_required_keys,
};

static BIO: SectionDescriptor = SectionDescriptor {
    id: SectionId::Bio,
    title: "Bio",
    role: "You write professional bios in the first person and the third person.",
    required_keys: &["shortBio", "longBio"],
    chunks: &[],
    validator: validate_required_keys,
};

static SMS: SectionDescriptor = SectionDescriptor {
    id: SectionId::Sms,
    title: "SMS Sequence",
    role: "You write short, friendly SMS reminders under 160 characters each.",
    required_keys: &["messages"],
    chunks: &[],
    validator: validate_required_keys,
};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn email(n: u32) -> Value {
        json!({"subject": format!("Subject {n}"), "body": format!("Body {n}")})
    }

    fn chunk_output(spec: &ChunkSpec) -> Value {
        let mut map = Map::new();
        for key in spec.keys {
            let n: u32 = key.trim_start_matches("email").parse().unwrap();
            map.insert(key.to_string(), email(n));
        }
        Value::Object(map)
    }

    #[test]
    fn test_every_section_has_a_matching_descriptor() {
        for section in SectionId::ALL {
            let descriptor = SectionDescriptor::for_section(section);
            assert_eq!(descriptor.id, section);
            assert!(!descriptor.required_keys.is_empty());
        }
    }

    #[test]
    fn test_chunk_keys_cover_required_keys_exactly_once() {
        for section in SectionId::ALL {
            let descriptor = SectionDescriptor::for_section(section);
            if !descriptor.is_chunked() {
                continue;
            }
            let mut owned: Vec<&str> = descriptor
                .chunks
                .iter()
                .flat_map(|c| c.keys.iter().copied())
                .collect();
            let total = owned.len();
            owned.sort();
            owned.dedup();
            assert_eq!(owned.len(), total, "{section} has overlapping chunk keys");
            let mut required: Vec<&str> = descriptor.required_keys.to_vec();
            required.sort();
            assert_eq!(owned, required, "{section}");
        }
    }

    #[test]
    fn test_merge_full() {
        let descriptor = SectionDescriptor::for_section(SectionId::Emails);
        let outputs: Vec<Option<Value>> =
            descriptor.chunks.iter().map(|c| Some(chunk_output(c))).collect();
        let merged = descriptor.merge(&outputs);
        assert_eq!(merged.as_object().unwrap().len(), 15);
        assert!(descriptor.validate(&merged).valid);
    }

    #[test]
    fn test_merge_missing_chunk_drops_only_its_keys() {
        let descriptor = SectionDescriptor::for_section(SectionId::Emails);
        let mut outputs: Vec<Option<Value>> =
            descriptor.chunks.iter().map(|c| Some(chunk_output(c))).collect();
        outputs[1] = None;

        let merged = descriptor.merge(&outputs);
        let map = merged.as_object().unwrap();
        for key in descriptor.chunks[1].keys {
            assert!(!map.contains_key(*key));
        }
        for (i, chunk) in descriptor.chunks.iter().enumerate() {
            if i == 1 {
                continue;
            }
            for key in chunk.keys {
                assert_eq!(map.get(*key), Some(&outputs[i].as_ref().unwrap()[*key]));
            }
        }

        let report = descriptor.validate(&merged);
        assert!(!report.valid);
        assert!(report.issues.iter().any(|i| i.contains("email5")));
    }

    #[test]
    fn test_merge_ignores_foreign_keys() {
        let descriptor = SectionDescriptor::for_section(SectionId::Vsl);
        let outputs = vec![
            Some(json!({"hook": "h", "problem": "p", "offer": "stolen"})),
            None,
            Some(json!({"offer": "real", "callToAction": "cta"})),
        ];
        let merged = descriptor.merge(&outputs);
        assert_eq!(merged["offer"], "real");
        assert!(merged.get("story").is_none());
    }

    #[test]
    fn test_merge_non_object_output_is_placeholder() {
        let descriptor = SectionDescriptor::for_section(SectionId::SalesScripts);
        let merged = descriptor.merge(&[
            Some(json!(["not", "an", "object"])),
            Some(json!({"offerPresentation": "x", "objectionHandling": [], "close": "c"})),
        ]);
        assert!(merged.get("opening").is_none());
        assert_eq!(merged["close"], "c");
    }

    #[test]
    fn test_validate_reports_blank_values() {
        let descriptor = SectionDescriptor::for_section(SectionId::Bio);
        let report = descriptor.validate(&json!({"shortBio": "  ", "longBio": "Long"}));
        assert!(!report.valid);
        assert_eq!(report.issues, vec!["empty value for 'shortBio'".to_string()]);

        let report = descriptor.validate(&json!("text"));
        assert!(!report.valid);
    }

    #[test]
    fn test_validate_funnel_copy_headline() {
        let descriptor = SectionDescriptor::for_section(SectionId::FunnelCopy);
        let content = json!({
            "optinPage": {"subheadline_text": "x"},
            "thankYouPage": {"headline": "Thanks"},
            "salesPage": {"headline": "Buy"},
            "calendarPage": {"headline": "Book"}
        });
        let report = descriptor.validate(&content);
        assert_eq!(report.issues, vec!["optinPage has no headline_text".to_string()]);
    }
}
