use serde::{Deserialize, Serialize};

use super::id_string_or_default;

/// A private message. Immutable once received.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, deserialize_with = "id_string_or_default")]
    pub id: String,
    #[serde(rename = "authorID", default, deserialize_with = "id_string_or_default")]
    pub author_id: String,
    #[serde(rename = "receiverID", default, deserialize_with = "id_string_or_default")]
    pub receiver_id: String,
    #[serde(default)]
    pub text: String,
    #[serde(rename = "createDate", default)]
    pub created_at: String,
}

impl Message {
    /// The participant that is not `me`, if the message involves `me` at all.
    pub fn counterpart(&self, me: &str) -> Option<&str> {
        if self.author_id == me {
            Some(&self.receiver_id)
        } else if self.receiver_id == me {
            Some(&self.author_id)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Post {
    #[serde(default, deserialize_with = "id_string_or_default")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub slug: String,
    #[serde(rename = "authorName", default)]
    pub author_name: String,
    #[serde(rename = "imageURL", default)]
    pub image_url: String,
    #[serde(rename = "lastEditionDate", default)]
    pub last_edition_date: String,
    #[serde(rename = "numberOfComments", default)]
    pub number_of_comments: u32,
    #[serde(rename = "listOfCategories", default)]
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Comment {
    #[serde(default, deserialize_with = "id_string_or_default")]
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(rename = "authorID", default, deserialize_with = "id_string_or_default")]
    pub author_id: String,
    #[serde(rename = "authorName", default)]
    pub author_name: String,
    #[serde(rename = "parentID", default, deserialize_with = "id_string_or_default")]
    pub parent_id: String,
    #[serde(rename = "lastModifiedDate", default)]
    pub last_modified_date: String,
}

/// Public profile of a forum member.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct User {
    #[serde(default, deserialize_with = "id_string_or_default")]
    pub id: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub firstname: String,
    #[serde(default)]
    pub lastname: String,
    #[serde(default)]
    pub email: String,
    #[serde(rename = "is_logged_in", default)]
    pub online: bool,
}
