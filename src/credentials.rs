//! Subjects that may log in, and password verification.
//!
//! Subjects come either from the built-in demo list or from a JSON file of
//! records with bcrypt password hashes. The list is immutable once loaded.

use serde::Deserialize;

use crate::protocol::{AccountSummary, Role, UserProfile};

/// bcrypt cost for the built-in demo accounts. Kept at the minimum so that
/// startup and tests stay fast; file-sourced hashes carry their own cost.
const DEMO_BCRYPT_COST: u32 = 4;

const DEMO_PASSWORD: &str = "123456";

/// Hashed at load time so unknown emails cost a bcrypt verify too.
const DUMMY_PASSWORD: &str = "authpair-dummy-password";

/// A subject known to the credential store.
#[derive(Debug, Clone)]
pub struct Subject {
    pub id: String,
    pub email: String,
    pub role: Role,
    pub name: String,
    password_hash: String,
    /// Shown by the demo accounts listing only.
    pub hint: Option<String>,
}

impl Subject {
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id.clone(),
            email: self.email.clone(),
            role: self.role,
            name: self.name.clone(),
        }
    }

    pub fn summary(&self) -> AccountSummary {
        AccountSummary {
            id: self.id.clone(),
            email: self.email.clone(),
            role: self.role,
            name: self.name.clone(),
            hint: self.hint.clone(),
        }
    }

    /// Check a plaintext password against this subject's verifier.
    pub fn verify_password(&self, password: &str) -> bool {
        bcrypt::verify(password, &self.password_hash).unwrap_or(false)
    }
}

/// On-disk subject record.
#[derive(Debug, Deserialize)]
struct SubjectRecord {
    id: String,
    email: String,
    role: Role,
    name: String,
    password_hash: String,
}

#[derive(Debug)]
pub enum CredentialsError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Hash(bcrypt::BcryptError),
    Duplicate(String),
    Empty,
}

impl std::fmt::Display for CredentialsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialsError::Io(e) => write!(f, "Failed to read subjects file: {}", e),
            CredentialsError::Parse(e) => write!(f, "Failed to parse subjects file: {}", e),
            CredentialsError::Hash(e) => write!(f, "Failed to hash password: {}", e),
            CredentialsError::Duplicate(key) => write!(f, "Duplicate subject: {}", key),
            CredentialsError::Empty => write!(f, "Subject list is empty"),
        }
    }
}

impl std::error::Error for CredentialsError {}

/// Immutable list of subjects.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    subjects: Vec<Subject>,
    /// Verified against when no subject matches, at the highest subject cost.
    dummy_hash: String,
}

impl CredentialStore {
    /// The two demo accounts, both with password `123456`.
    pub fn demo() -> Result<Self, CredentialsError> {
        let hash = bcrypt::hash(DEMO_PASSWORD, DEMO_BCRYPT_COST).map_err(CredentialsError::Hash)?;
        let hint = Some(format!("password is {}", DEMO_PASSWORD));

        Self::from_subjects(vec![
            Subject {
                id: "1".to_string(),
                email: "admin@example.com".to_string(),
                role: Role::Admin,
                name: "Admin User".to_string(),
                password_hash: hash.clone(),
                hint: hint.clone(),
            },
            Subject {
                id: "2".to_string(),
                email: "student@example.com".to_string(),
                role: Role::Student,
                name: "Student User".to_string(),
                password_hash: hash,
                hint,
            },
        ])
    }

    /// Load subjects from a JSON array of
    /// `{id, email, role, name, password_hash}` records.
    pub fn from_file(path: &str) -> Result<Self, CredentialsError> {
        let content = std::fs::read_to_string(path).map_err(CredentialsError::Io)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, CredentialsError> {
        let records: Vec<SubjectRecord> =
            serde_json::from_str(content).map_err(CredentialsError::Parse)?;

        Self::from_subjects(
            records
                .into_iter()
                .map(|r| Subject {
                    id: r.id,
                    email: r.email,
                    role: r.role,
                    name: r.name,
                    password_hash: r.password_hash,
                    hint: None,
                })
                .collect(),
        )
    }

    /// Build a store from subjects, rejecting duplicate ids or emails.
    pub fn from_subjects(subjects: Vec<Subject>) -> Result<Self, CredentialsError> {
        if subjects.is_empty() {
            return Err(CredentialsError::Empty);
        }

        for (i, subject) in subjects.iter().enumerate() {
            for other in &subjects[i + 1..] {
                if other.id == subject.id {
                    return Err(CredentialsError::Duplicate(format!("id {}", subject.id)));
                }
                if other.email.eq_ignore_ascii_case(&subject.email) {
                    return Err(CredentialsError::Duplicate(format!(
                        "email {}",
                        subject.email
                    )));
                }
            }
        }

        let cost = subjects
            .iter()
            .filter_map(|s| s.password_hash.parse::<bcrypt::HashParts>().ok())
            .map(|parts| parts.get_cost())
            .max()
            .unwrap_or(DEMO_BCRYPT_COST);
        let dummy_hash = bcrypt::hash(DUMMY_PASSWORD, cost).map_err(CredentialsError::Hash)?;

        Ok(Self {
            subjects,
            dummy_hash,
        })
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Subject> {
        self.subjects.iter().find(|s| s.id == id)
    }

    pub fn find_by_email(&self, email: &str) -> Option<&Subject> {
        self.subjects
            .iter()
            .find(|s| s.email.eq_ignore_ascii_case(email))
    }

    /// Find the subject with this email and password.
    /// CPU-bound (bcrypt); run it off the async executor.
    /// Unknown emails still pay for one bcrypt verify.
    pub fn verify(&self, email: &str, password: &str) -> Option<&Subject> {
        match self.find_by_email(email) {
            Some(subject) => subject.verify_password(password).then_some(subject),
            None => {
                let _ = bcrypt::verify(password, &self.dummy_hash);
                None
            }
        }
    }

    pub fn subjects(&self) -> &[Subject] {
        &self.subjects
    }
}

/// Build a subject with a freshly hashed password. Used by tests and tooling.
pub fn subject_with_password(
    id: &str,
    email: &str,
    role: Role,
    name: &str,
    password: &str,
) -> Result<Subject, CredentialsError> {
    let password_hash = bcrypt::hash(password, DEMO_BCRYPT_COST).map_err(CredentialsError::Hash)?;
    Ok(Subject {
        id: id.to_string(),
        email: email.to_string(),
        role,
        name: name.to_string(),
        password_hash,
        hint: None,
    })
}
