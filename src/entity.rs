use serde::{Deserialize, Serialize};
use std::fmt;

/// One side of a conversation.
///
/// There is no user directory, so a post author's display name doubles as
/// their id. Two authors who pick the same name are indistinguishable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub name: String,
}

impl Participant {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// The seller side of a post's conversations: the author name is reused as the id.
    pub fn author(author: &str) -> Self {
        Self::new(author, author)
    }
}

impl fmt::Display for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// The locally simulated current user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer {
    pub id: String,
    pub name: String,
}

impl Viewer {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    pub fn participant(&self) -> Participant {
        Participant::new(self.id.clone(), self.name.clone())
    }
}
