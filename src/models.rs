use serde::{Deserialize, Serialize};

pub const MANDATORY_SUBJECT: &str = "russian";
pub const MAX_SUBJECTS: usize = 3;
pub const OPTION_COUNT: usize = 4;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SubjectInfo {
    pub id: &'static str,
    pub name: &'static str,
}

pub const SUBJECTS: [SubjectInfo; 8] = [
    SubjectInfo { id: "english", name: "Ingliz tili" },
    SubjectInfo { id: "math", name: "Matematika" },
    SubjectInfo { id: "cs", name: "Informatika" },
    SubjectInfo { id: "chemistry", name: "Kimyo" },
    SubjectInfo { id: "history", name: "Tarix" },
    SubjectInfo { id: "biology", name: "Biologiya" },
    SubjectInfo { id: "physics", name: "Fizika" },
    SubjectInfo { id: "russian", name: "Rus tili" },
];

pub fn is_known_subject(id: &str) -> bool {
    SUBJECTS.iter().any(|s| s.id == id)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LanguageLevel {
    None,
    Medium,
    Good,
}

impl LanguageLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LanguageLevel::None => "none",
            LanguageLevel::Medium => "medium",
            LanguageLevel::Good => "good",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "none" => Some(LanguageLevel::None),
            "medium" => Some(LanguageLevel::Medium),
            "good" => Some(LanguageLevel::Good),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FormField {
    FirstName,
    LastName,
    Phone,
    Region,
    District,
    SchoolNumber,
    Q1,
    Q2,
    Q3,
    Q4,
    Q5,
    Q6,
    EnglishLevel,
    RussianLevel,
}

/// Checked by registration validation, in this order.
pub const REQUIRED_FIELDS: [FormField; 10] = [
    FormField::FirstName,
    FormField::LastName,
    FormField::Region,
    FormField::SchoolNumber,
    FormField::Q1,
    FormField::Q2,
    FormField::Q3,
    FormField::Q4,
    FormField::Q5,
    FormField::Q6,
];

impl FormField {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormField::FirstName => "first_name",
            FormField::LastName => "last_name",
            FormField::Phone => "phone",
            FormField::Region => "region",
            FormField::District => "district",
            FormField::SchoolNumber => "school_number",
            FormField::Q1 => "q1",
            FormField::Q2 => "q2",
            FormField::Q3 => "q3",
            FormField::Q4 => "q4",
            FormField::Q5 => "q5",
            FormField::Q6 => "q6",
            FormField::EnglishLevel => "english_level",
            FormField::RussianLevel => "russian_level",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let field = match raw.trim() {
            "first_name" => FormField::FirstName,
            "last_name" => FormField::LastName,
            "phone" => FormField::Phone,
            "region" => FormField::Region,
            "district" => FormField::District,
            "school_number" => FormField::SchoolNumber,
            "q1" => FormField::Q1,
            "q2" => FormField::Q2,
            "q3" => FormField::Q3,
            "q4" => FormField::Q4,
            "q5" => FormField::Q5,
            "q6" => FormField::Q6,
            "english_level" => FormField::EnglishLevel,
            "russian_level" => FormField::RussianLevel,
            _ => return None,
        };
        Some(field)
    }

    pub fn is_level(&self) -> bool {
        matches!(self, FormField::EnglishLevel | FormField::RussianLevel)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FormData {
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub region: String,
    pub district: String,
    pub school_number: String,
    pub q1: String,
    pub q2: String,
    pub q3: String,
    pub q4: String,
    pub q5: String,
    pub q6: String,
    pub english_level: Option<LanguageLevel>,
    pub russian_level: Option<LanguageLevel>,
}

impl FormData {
    /// Overwrites one field. Level fields fall back to unset when `value` is not a known level.
    pub fn set(&mut self, field: FormField, value: String) {
        let slot = match field {
            FormField::EnglishLevel => {
                self.english_level = LanguageLevel::parse(&value);
                return;
            }
            FormField::RussianLevel => {
                self.russian_level = LanguageLevel::parse(&value);
                return;
            }
            FormField::FirstName => &mut self.first_name,
            FormField::LastName => &mut self.last_name,
            FormField::Phone => &mut self.phone,
            FormField::Region => &mut self.region,
            FormField::District => &mut self.district,
            FormField::SchoolNumber => &mut self.school_number,
            FormField::Q1 => &mut self.q1,
            FormField::Q2 => &mut self.q2,
            FormField::Q3 => &mut self.q3,
            FormField::Q4 => &mut self.q4,
            FormField::Q5 => &mut self.q5,
            FormField::Q6 => &mut self.q6,
        };
        *slot = value;
    }

    pub fn get(&self, field: FormField) -> &str {
        match field {
            FormField::FirstName => &self.first_name,
            FormField::LastName => &self.last_name,
            FormField::Phone => &self.phone,
            FormField::Region => &self.region,
            FormField::District => &self.district,
            FormField::SchoolNumber => &self.school_number,
            FormField::Q1 => &self.q1,
            FormField::Q2 => &self.q2,
            FormField::Q3 => &self.q3,
            FormField::Q4 => &self.q4,
            FormField::Q5 => &self.q5,
            FormField::Q6 => &self.q6,
            FormField::EnglishLevel => self.english_level.map(|l| l.as_str()).unwrap_or(""),
            FormField::RussianLevel => self.russian_level.map(|l| l.as_str()).unwrap_or(""),
        }
    }

    pub fn first_missing_field(&self) -> Option<FormField> {
        REQUIRED_FIELDS
            .iter()
            .copied()
            .find(|field| self.get(*field).trim().is_empty())
    }
}

/// One authored multiple-choice question. `q`/`a` are accepted for banks saved by older clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Question {
    #[serde(alias = "q")]
    pub prompt: String,
    pub options: [String; OPTION_COUNT],
    #[serde(alias = "a")]
    pub correct: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: String,
    pub issue: String,
}

impl ValidationIssue {
    pub fn new(field: impl Into<String>, issue: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            issue: issue.into(),
        }
    }
}

pub fn validate_question(question: &Question) -> Result<(), Vec<ValidationIssue>> {
    let mut issues = Vec::new();
    if question.prompt.trim().is_empty() {
        issues.push(ValidationIssue::new("prompt", "must not be empty"));
    }
    for (i, option) in question.options.iter().enumerate() {
        if option.trim().is_empty() {
            issues.push(ValidationIssue::new(format!("options[{i}]"), "must not be empty"));
        }
    }
    if question.correct >= OPTION_COUNT {
        issues.push(ValidationIssue::new(
            "correct",
            format!("must be between 0 and {}", OPTION_COUNT - 1),
        ));
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_question() -> Question {
        Question {
            prompt: "2+2".into(),
            options: ["3".into(), "4".into(), "5".into(), "6".into()],
            correct: 1,
        }
    }

    #[test]
    fn validate_question_ok() {
        assert!(validate_question(&sample_question()).is_ok());
    }

    #[test]
    fn validate_question_reports_blank_option_and_range() {
        let mut q = sample_question();
        q.options[2] = "   ".into();
        q.correct = 4;
        let issues = validate_question(&q).unwrap_err();
        assert!(issues.iter().any(|i| i.field == "options[2]"));
        assert!(issues.iter().any(|i| i.field == "correct"));
    }

    #[test]
    fn question_accepts_short_keys() {
        let q: Question = serde_json::from_str(r#"{"q":"2+2","options":["3","4","5","6"],"a":1}"#).unwrap();
        assert_eq!(q, sample_question());
    }

    #[test]
    fn form_field_names_roundtrip_through_parse() {
        for field in REQUIRED_FIELDS {
            assert_eq!(FormField::parse(field.as_str()), Some(field));
        }
        assert_eq!(FormField::parse("english_level"), Some(FormField::EnglishLevel));
        assert_eq!(FormField::parse("password"), None);
    }

    #[test]
    fn level_fields_clear_on_unknown_value() {
        let mut form = FormData::default();
        form.set(FormField::EnglishLevel, "good".into());
        assert_eq!(form.english_level, Some(LanguageLevel::Good));
        assert_eq!(form.get(FormField::EnglishLevel), "good");
        form.set(FormField::EnglishLevel, "fluent".into());
        assert_eq!(form.english_level, None);
        assert_eq!(form.get(FormField::EnglishLevel), "");
    }

    #[test]
    fn first_missing_field_follows_fixed_order() {
        let mut form = FormData::default();
        form.set(FormField::FirstName, "Ali".into());
        assert_eq!(form.first_missing_field(), Some(FormField::LastName));
        form.set(FormField::LastName, "Valiyev".into());
        form.set(FormField::Region, " \t".into());
        assert_eq!(form.first_missing_field(), Some(FormField::Region));
    }

    #[test]
    fn catalog_contains_mandatory_subject() {
        assert!(is_known_subject(MANDATORY_SUBJECT));
        assert!(!is_known_subject("astrology"));
    }
}
