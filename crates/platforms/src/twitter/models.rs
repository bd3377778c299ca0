use serde::Deserialize;
use serde_json::{Value, json};

use crate::job::{Actor, Job, PostObject, Target};

#[derive(Debug, Default, Deserialize)]
pub struct TwitterUser {
    #[serde(default)]
    pub screen_name: String,
    pub name: Option<String>,
    pub id: Option<Value>,
    pub profile_image_url_https: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Mention {
    #[serde(default)]
    pub screen_name: String,
    pub name: Option<String>,
    pub id: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct Hashtag {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct UrlEntity {
    pub expanded_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Entities {
    #[serde(default)]
    pub user_mentions: Vec<Mention>,
    #[serde(default)]
    pub hashtags: Vec<Hashtag>,
    #[serde(default)]
    pub urls: Vec<UrlEntity>,
}

#[derive(Debug, Deserialize)]
pub struct Tweet {
    #[serde(default)]
    pub user: TwitterUser,
    #[serde(default)]
    pub entities: Entities,
    pub text: Option<String>,
    pub created_at: Option<String>,
    pub id: Option<Value>,
    pub id_str: Option<String>,
    pub source: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub message: String,
    pub code: Option<i64>,
}

/// Error document of the v1.1 API.
#[derive(Debug, Deserialize)]
pub struct ApiErrors {
    pub errors: Vec<ApiError>,
}

impl ApiErrors {
    pub fn message(&self) -> String {
        self.errors
            .iter()
            .map(|e| match e.code {
                Some(code) => format!("{} (code {})", e.message, code),
                None => e.message.clone(),
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl Tweet {
    /// Mentions become `cc` targets; tags, urls and the raw ids ride along in
    /// the object.
    pub fn into_job(self) -> Job {
        let actor = Actor {
            address: self.user.screen_name,
            name: self.user.name,
            id: self.user.id,
            image: self.user.profile_image_url_https,
        };

        let targets = self
            .entities
            .user_mentions
            .into_iter()
            .map(|m| Target {
                address: m.screen_name,
                kind: Some("cc".to_string()),
                name: m.name,
                id: m.id,
            })
            .collect();

        let tags: Vec<String> = self.entities.hashtags.into_iter().map(|h| h.text).collect();
        let urls: Vec<String> = self
            .entities
            .urls
            .into_iter()
            .filter_map(|u| u.expanded_url)
            .collect();

        let mut object = PostObject {
            text: self.text,
            date: self.created_at,
            id: self.id,
            ..Default::default()
        };
        object.extra.insert("tags".to_string(), json!(tags));
        object.extra.insert("urls".to_string(), json!(urls));
        if let Some(id_str) = self.id_str {
            object.extra.insert("id_str".to_string(), Value::String(id_str));
        }
        if let Some(source) = self.source {
            object.extra.insert("source".to_string(), Value::String(source));
        }

        Job::post_item(actor, targets, object)
    }
}
