// docrepo-core/src/models.rs
//! Interview-practice entities and their collection bindings

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::document::{Entity, EntityMeta};
use crate::error::{FieldErrors, Result};
use crate::schema::SchemaRegistry;

pub const USERS: &str = "users";
pub const INTERVIEWS: &str = "interviews";
pub const JOB_POSTINGS: &str = "job_postings";
pub const FEEDBACK: &str = "feedback";
pub const PRACTICE_INTERVIEWS: &str = "practice_interviews";

/// Registry with every model bound to its collection
pub fn default_registry() -> Result<SchemaRegistry> {
    let registry = SchemaRegistry::new();
    registry.register::<User>(USERS)?;
    registry.register::<Interview>(INTERVIEWS)?;
    registry.register::<JobPosting>(JOB_POSTINGS)?;
    registry.register::<Feedback>(FEEDBACK)?;
    registry.register::<PracticeInterview>(PRACTICE_INTERVIEWS)?;
    Ok(registry)
}

macro_rules! impl_meta {
    ($($field:ident).+) => {
        fn meta(&self) -> &EntityMeta {
            &self.$($field).+
        }

        fn meta_mut(&mut self) -> &mut EntityMeta {
            &mut self.$($field).+
        }
    };
}

// ========== User ==========

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(flatten)]
    pub meta: EntityMeta,
    pub email: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_role() -> String {
    "candidate".to_string()
}

fn default_true() -> bool {
    true
}

impl User {
    pub fn new(email: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            meta: EntityMeta::new(),
            email: email.into(),
            display_name: display_name.into(),
            role: default_role(),
            is_active: true,
        }
    }
}

impl Entity for User {
    const SCHEMA_NAME: &'static str = "User";

    fn schema_definition() -> Value {
        json!({
            "type": "object",
            "required": ["email", "display_name"],
            "properties": {
                "email": {"type": "string", "pattern": "^[^@\\s]+@[^@\\s]+\\.[^@\\s]+$", "maxLength": 254},
                "display_name": {"type": "string", "alias": "displayName", "minLength": 1, "maxLength": 100},
                "role": {"type": "string", "enum": ["candidate", "interviewer", "admin"]},
                "is_active": {"type": "boolean"}
            }
        })
    }

    impl_meta!(meta);
}

// ========== Interview ==========

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub topic: String,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interview {
    #[serde(flatten)]
    pub meta: EntityMeta,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "jobPostingId", default)]
    pub job_posting_id: Option<String>,
    pub status: String,
    #[serde(default)]
    pub score: i64,
    #[serde(default = "default_stage")]
    pub stage: i64,
    #[serde(default)]
    pub questions: Vec<Question>,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_stage() -> i64 {
    1
}

impl Interview {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            meta: EntityMeta::new(),
            user_id: user_id.into(),
            job_posting_id: None,
            status: "pending".to_string(),
            score: 0,
            stage: default_stage(),
            questions: Vec::new(),
            notes: None,
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    pub fn with_score(mut self, score: i64) -> Self {
        self.score = score;
        self
    }
}

impl Entity for Interview {
    const SCHEMA_NAME: &'static str = "Interview";

    fn schema_definition() -> Value {
        json!({
            "type": "object",
            "required": ["user_id", "status", "score", "stage"],
            "properties": {
                "user_id": {"type": "string", "alias": "userId", "minLength": 1},
                "job_posting_id": {"type": ["string", "null"], "alias": "jobPostingId"},
                "status": {"type": "string", "enum": ["pending", "in_progress", "completed", "cancelled"]},
                "score": {"type": "integer", "minimum": 0, "maximum": 100},
                "stage": {"type": "integer", "minimum": 1, "maximum": 10},
                "questions": {"type": "array", "maxItems": 50},
                "notes": {"type": ["string", "null"], "maxLength": 5000}
            }
        })
    }

    impl_meta!(meta);
}

// ========== PracticeInterview ==========

/// Self-guided interview. Shares the `Interview` shape, so it may read the
/// `interviews` collection as well as its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PracticeInterview {
    #[serde(flatten)]
    pub interview: Interview,
    #[serde(default)]
    pub difficulty: Option<String>,
    #[serde(default)]
    pub hints_used: i64,
}

impl PracticeInterview {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            interview: Interview::new(user_id),
            difficulty: None,
            hints_used: 0,
        }
    }
}

impl Entity for PracticeInterview {
    const SCHEMA_NAME: &'static str = "PracticeInterview";
    const LINEAGE: &'static [&'static str] = &["Interview"];

    fn schema_definition() -> Value {
        let mut schema = Interview::schema_definition();
        if let Some(properties) = schema["properties"].as_object_mut() {
            properties.insert(
                "difficulty".to_string(),
                json!({"type": ["string", "null"], "enum": ["easy", "medium", "hard", null]}),
            );
            properties.insert(
                "hints_used".to_string(),
                json!({"type": "integer", "minimum": 0, "maximum": 20}),
            );
        }
        schema
    }

    impl_meta!(interview.meta);
}

// ========== JobPosting ==========

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    pub name: String,
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPosting {
    #[serde(flatten)]
    pub meta: EntityMeta,
    pub title: String,
    pub company: Company,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub salary_min: Option<i64>,
    #[serde(default)]
    pub salary_max: Option<i64>,
    #[serde(default = "default_true")]
    pub is_open: bool,
}

impl JobPosting {
    pub fn new(title: impl Into<String>, company: impl Into<String>) -> Self {
        Self {
            meta: EntityMeta::new(),
            title: title.into(),
            company: Company {
                name: company.into(),
                location: None,
            },
            skills: Vec::new(),
            salary_min: None,
            salary_max: None,
            is_open: true,
        }
    }
}

impl Entity for JobPosting {
    const SCHEMA_NAME: &'static str = "JobPosting";

    fn schema_definition() -> Value {
        json!({
            "type": "object",
            "required": ["title", "company"],
            "properties": {
                "title": {"type": "string", "minLength": 1, "maxLength": 200},
                "company": {"type": "object"},
                "skills": {"type": "array", "maxItems": 50},
                "salary_min": {"type": ["integer", "null"], "minimum": 0},
                "salary_max": {"type": ["integer", "null"], "minimum": 0},
                "is_open": {"type": "boolean"}
            }
        })
    }

    impl_meta!(meta);

    fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        if self.company.name.trim().is_empty() {
            errors.add("company", "company name must not be empty");
        }
        if let (Some(min), Some(max)) = (self.salary_min, self.salary_max) {
            if min > max {
                errors.add("salary_min", "must not exceed salary_max");
            }
        }
        errors
    }
}

// ========== Feedback ==========

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    #[serde(flatten)]
    pub meta: EntityMeta,
    #[serde(rename = "interviewId")]
    pub interview_id: String,
    pub rating: i64,
    #[serde(default)]
    pub comment: Option<String>,
    /// Per-category scores, e.g. `{"communication": 4}`
    #[serde(default)]
    pub scores: BTreeMap<String, i64>,
}

impl Feedback {
    pub fn new(interview_id: impl Into<String>, rating: i64) -> Self {
        Self {
            meta: EntityMeta::new(),
            interview_id: interview_id.into(),
            rating,
            comment: None,
            scores: BTreeMap::new(),
        }
    }
}

impl Entity for Feedback {
    const SCHEMA_NAME: &'static str = "Feedback";

    fn schema_definition() -> Value {
        json!({
            "type": "object",
            "required": ["interview_id", "rating"],
            "properties": {
                "interview_id": {"type": "string", "alias": "interviewId", "minLength": 1},
                "rating": {"type": "integer", "minimum": 1, "maximum": 5},
                "comment": {"type": ["string", "null"], "maxLength": 2000},
                "scores": {"type": "object"}
            }
        })
    }

    impl_meta!(meta);

    // A low rating has to say why.
    fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        let has_comment = self
            .comment
            .as_deref()
            .map_or(false, |c| !c.trim().is_empty());
        if self.rating <= 2 && !has_comment {
            errors.add("comment", "required when rating is 2 or lower");
        }
        errors
    }
}
