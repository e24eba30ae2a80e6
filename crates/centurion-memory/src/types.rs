use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq)]
pub enum FactSource {
    User,
    Bot,
    Inferred,
}

impl std::fmt::Display for FactSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FactSource::User => "user",
            FactSource::Bot => "bot",
            FactSource::Inferred => "inferred",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for FactSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(FactSource::User),
            "bot" => Ok(FactSource::Bot),
            "inferred" => Ok(FactSource::Inferred),
            other => Err(format!("unknown fact source: {}", other)),
        }
    }
}

/// A long-term fact about a lead.
#[derive(Debug, Clone)]
pub struct Fact {
    pub id: String,
    pub company_id: String,
    pub lead_id: String,
    pub category: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub source: FactSource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A chunk of a knowledge-base document, read (not ingested) by this crate.
#[derive(Debug, Clone)]
pub struct KnowledgeChunk {
    pub id: String,
    pub company_id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}
