use super::{CollectionPath, DocPath};

pub const USERS: &str = "users";
pub const ACTIVE_QUIZZES: &str = "active_quizzes";
pub const COMPLETED_QUIZZES: &str = "completed_quizzes";
pub const ACHIEVEMENTS: &str = "achievements";
pub const INCIDENTS: &str = "incidents";
pub const DAILY_QUIZ: &str = "daily_quiz";
pub const DAILY_QUIZ_DOC_ID: &str = "current";

pub fn user(user_id: &str) -> DocPath {
    CollectionPath::root(USERS).doc(user_id)
}

pub fn active_quizzes(user_id: &str) -> CollectionPath {
    user(user_id).collection(ACTIVE_QUIZZES)
}

pub fn active_quiz(user_id: &str, quiz_id: &str) -> DocPath {
    active_quizzes(user_id).doc(quiz_id)
}

pub fn completed_quizzes(user_id: &str) -> CollectionPath {
    user(user_id).collection(COMPLETED_QUIZZES)
}

pub fn completed_quiz(user_id: &str, quiz_id: &str) -> DocPath {
    completed_quizzes(user_id).doc(quiz_id)
}

pub fn achievements(user_id: &str) -> CollectionPath {
    user(user_id).collection(ACHIEVEMENTS)
}

pub fn incidents() -> CollectionPath {
    CollectionPath::root(INCIDENTS)
}

pub fn incident(incident_id: &str) -> DocPath {
    incidents().doc(incident_id)
}

/// The process-wide daily quiz singleton.
pub fn daily_quiz() -> DocPath {
    CollectionPath::root(DAILY_QUIZ).doc(DAILY_QUIZ_DOC_ID)
}
