use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::expiry::ASAP;

/// Three-state patch value for partial updates that survives serialization round-trips.
/// Unlike `Option<Option<T>>`, each variant has a distinct wire representation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum Patch<T> {
    /// Field was not included in the request (no change).
    #[default]
    Absent,
    /// Field was explicitly set to null (clear it).
    Null,
    /// Field was set to a new value.
    Value(T),
}

impl<T> From<Option<Option<T>>> for Patch<T> {
    fn from(v: Option<Option<T>>) -> Self {
        match v {
            None => Patch::Absent,
            Some(None) => Patch::Null,
            Some(Some(v)) => Patch::Value(v),
        }
    }
}

impl<T: Clone> Patch<T> {
    /// Apply the patch to an optional field in place.
    pub fn apply_to(&self, field: &mut Option<T>) {
        match self {
            Patch::Absent => {}
            Patch::Null => *field = None,
            Patch::Value(v) => *field = Some(v.clone()),
        }
    }
}

impl<T> Patch<T> {
    pub fn is_absent(&self) -> bool {
        matches!(self, Patch::Absent)
    }
}

/// Which table a record lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Upload,
    Form,
}

impl RecordKind {
    pub const ALL: [RecordKind; 2] = [RecordKind::Upload, RecordKind::Form];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Upload => "upload",
            RecordKind::Form => "form",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One or more uploaded files stored under `<storage>/<id>/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Upload {
    pub id: String,
    pub expire: String,
    /// Final filename visible to the downloader. A zip archive when
    /// several files were uploaded at once.
    pub file: String,
    /// Original member names, kept so they can be removed after archiving.
    #[serde(default)]
    pub members: Vec<String>,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub context: String,
}

/// A pre-created upload link; its id doubles as a one-time upload key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Form {
    pub id: String,
    pub expire: String,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub notify: Option<String>,
}

impl Upload {
    pub fn expires_on_access(&self) -> bool {
        self.expire == ASAP
    }

    pub fn url(&self, base_url: &str) -> String {
        format!(
            "{}/download/{}/{}",
            base_url.trim_end_matches('/'),
            self.id,
            self.file
        )
    }
}

impl Form {
    pub fn url(&self, base_url: &str) -> String {
        format!("{}/form/{}", base_url.trim_end_matches('/'), self.id)
    }
}

/// A persisted entity, stored as JSON tagged with its `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Record {
    Upload(Upload),
    Form(Form),
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Upload(_) => RecordKind::Upload,
            Record::Form(_) => RecordKind::Form,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Record::Upload(u) => &u.id,
            Record::Form(f) => &f.id,
        }
    }

    pub fn expire(&self) -> &str {
        match self {
            Record::Upload(u) => &u.expire,
            Record::Form(f) => &f.expire,
        }
    }

    pub fn created(&self) -> DateTime<Utc> {
        match self {
            Record::Upload(u) => u.created,
            Record::Form(f) => f.created,
        }
    }

    pub fn context(&self) -> &str {
        match self {
            Record::Upload(u) => &u.context,
            Record::Form(f) => &f.context,
        }
    }

    /// Whether a caller with `context` may read or delete this record.
    ///
    /// An empty caller context is the public/unauthenticated mode and sees
    /// everything, as does the configured superuser context.
    pub fn visible_to(&self, context: &str, super_context: &str) -> bool {
        context.is_empty()
            || context == self.context()
            || (!super_context.is_empty() && context == super_context)
    }

    /// Match `query` against expire, created, file and description. Any hit counts.
    pub fn matches(&self, query: &Regex) -> bool {
        if query.is_match(self.expire()) || query.is_match(&self.created().to_rfc3339()) {
            return true;
        }
        match self {
            Record::Upload(u) => query.is_match(&u.file),
            Record::Form(f) => f.description.as_deref().is_some_and(|d| query.is_match(d)),
        }
    }

    pub fn into_upload(self) -> Option<Upload> {
        match self {
            Record::Upload(u) => Some(u),
            Record::Form(_) => None,
        }
    }

    pub fn into_form(self) -> Option<Form> {
        match self {
            Record::Form(f) => Some(f),
            Record::Upload(_) => None,
        }
    }
}

impl From<Upload> for Record {
    fn from(u: Upload) -> Self {
        Record::Upload(u)
    }
}

impl From<Form> for Record {
    fn from(f: Form) -> Self {
        Record::Form(f)
    }
}

/// Fields a caller may change on an existing record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordUpdate {
    #[serde(default)]
    pub expire: Option<String>,
    /// Forms only.
    #[serde(default)]
    pub description: Patch<String>,
    /// Forms only.
    #[serde(default)]
    pub notify: Patch<String>,
}

impl RecordUpdate {
    pub fn is_empty(&self) -> bool {
        self.expire.is_none() && self.description.is_absent() && self.notify.is_absent()
    }

    /// Apply to a record. `id`, `created` and `context` are never touched.
    pub fn apply(&self, record: &mut Record) {
        match record {
            Record::Upload(u) => {
                if let Some(ref expire) = self.expire {
                    u.expire = expire.clone();
                }
            }
            Record::Form(f) => {
                if let Some(ref expire) = self.expire {
                    f.expire = expire.clone();
                }
                self.description.apply_to(&mut f.description);
                self.notify.apply_to(&mut f.notify);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(context: &str) -> Record {
        Record::Upload(Upload {
            id: "u-1".to_string(),
            expire: "1h".to_string(),
            file: "report.pdf".to_string(),
            members: vec!["report.pdf".to_string()],
            created: Utc::now(),
            context: context.to_string(),
        })
    }

    #[test]
    fn record_json_is_tagged_with_kind() {
        let json = serde_json::to_value(upload("")).unwrap();
        assert_eq!(json["kind"], "upload");
        assert_eq!(json["file"], "report.pdf");
    }

    #[test]
    fn visibility_rules() {
        let rec = upload("tenant-b");
        assert!(rec.visible_to("", "root"));
        assert!(rec.visible_to("tenant-b", "root"));
        assert!(rec.visible_to("root", "root"));
        assert!(!rec.visible_to("tenant-a", "root"));
        assert!(!rec.visible_to("tenant-a", ""));
    }

    #[test]
    fn query_matches_any_field() {
        let rec = upload("");
        assert!(rec.matches(&Regex::new(r"\.pdf$").unwrap()));
        assert!(rec.matches(&Regex::new("^1h$").unwrap()));
        assert!(!rec.matches(&Regex::new("zip").unwrap()));

        let form = Record::Form(Form {
            id: "f-1".to_string(),
            expire: "asap".to_string(),
            created: Utc::now(),
            context: String::new(),
            description: Some("quarterly invoices".to_string()),
            notify: None,
        });
        assert!(form.matches(&Regex::new("invoices").unwrap()));
        assert!(!form.matches(&Regex::new("report").unwrap()));
    }

    #[test]
    fn update_leaves_identity_alone() {
        let mut rec = Record::Form(Form {
            id: "f-2".to_string(),
            expire: "1d".to_string(),
            created: Utc::now(),
            context: "ctx".to_string(),
            description: Some("old".to_string()),
            notify: Some("ops@example.com".to_string()),
        });
        let before = rec.clone();

        RecordUpdate {
            expire: Some("2d".to_string()),
            description: Patch::Value("new".to_string()),
            notify: Patch::Null,
        }
        .apply(&mut rec);

        let form = rec.into_form().unwrap();
        assert_eq!(form.expire, "2d");
        assert_eq!(form.description.as_deref(), Some("new"));
        assert_eq!(form.notify, None);
        assert_eq!(form.created, before.created());
        assert_eq!(form.context, "ctx");
    }

    #[test]
    fn urls_are_derived() {
        let rec = upload("").into_upload().unwrap();
        assert_eq!(
            rec.url("http://localhost:8080/"),
            "http://localhost:8080/download/u-1/report.pdf"
        );
    }
}
