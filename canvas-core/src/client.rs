use bytes::Bytes;
use futures_util::{Stream, TryStreamExt};
use reqwest::header::{AUTHORIZATION, HeaderMap, LINK};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const PAGE_SIZE: &str = "100";

#[derive(Debug, Error)]
pub enum CanvasError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CourseStatus {
    #[default]
    All,
    Completed,
    Ongoing,
}

#[derive(Clone)]
pub struct CanvasClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl CanvasClient {
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self, CanvasError> {
        let mut base_url = Url::parse(base_url)?;
        // Canvas may be mounted below a path prefix; keep it when joining.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            http: Client::new(),
            base_url,
            token: token.into(),
        })
    }

    /// Active enrollments of the current user, with progress attached so they
    /// can be classified by `status`.
    pub async fn list_courses(&self, status: CourseStatus) -> Result<Vec<Course>, CanvasError> {
        let mut url = self.endpoint("api/v1/courses")?;
        url.query_pairs_mut()
            .append_pair("enrollment_state", "active")
            .append_pair("include[]", "course_progress")
            .append_pair("per_page", PAGE_SIZE);
        let courses: Vec<Course> = self.get_paginated(url).await?;
        Ok(courses
            .into_iter()
            .filter(|course| status.matches(course))
            .collect())
    }

    /// Every folder of a course, nested ones included, as a flat list.
    pub async fn list_folders(&self, course_id: u64) -> Result<Vec<Folder>, CanvasError> {
        let mut url = self.endpoint(&format!("api/v1/courses/{course_id}/folders"))?;
        url.query_pairs_mut().append_pair("per_page", PAGE_SIZE);
        self.get_paginated(url).await
    }

    pub async fn list_files(&self, course_id: u64) -> Result<Vec<File>, CanvasError> {
        let mut url = self.endpoint(&format!("api/v1/courses/{course_id}/files"))?;
        url.query_pairs_mut().append_pair("per_page", PAGE_SIZE);
        self.get_paginated(url).await
    }

    pub async fn get_profile(&self) -> Result<Profile, CanvasError> {
        let url = self.endpoint("api/v1/users/self/profile")?;
        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn get_quota(&self) -> Result<Quota, CanvasError> {
        let url = self.endpoint("api/v1/users/self/files/quota")?;
        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Opens the body of a file download url as a lazy byte stream.
    pub async fn fetch_stream(
        &self,
        url: &str,
    ) -> Result<impl Stream<Item = Result<Bytes, CanvasError>> + Send + 'static, CanvasError>
    {
        let url = Url::parse(url)?;
        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, self.auth_header_value())
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CanvasError::Api { status, body });
        }
        Ok(response.bytes_stream().map_err(CanvasError::from))
    }

    async fn get_paginated<T: serde::de::DeserializeOwned>(
        &self,
        first: Url,
    ) -> Result<Vec<T>, CanvasError> {
        let mut items = Vec::new();
        let mut url = first;
        loop {
            let response = self
                .http
                .get(url.clone())
                .header(AUTHORIZATION, self.auth_header_value())
                .send()
                .await?;
            let next = next_page(response.headers());
            let page: Vec<T> = Self::handle_response(response).await?;
            items.extend(page);
            match next {
                Some(next) if next != url => url = next,
                _ => break,
            }
        }
        Ok(items)
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn endpoint(&self, path: &str) -> Result<Url, CanvasError> {
        Ok(self.base_url.join(path)?)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, CanvasError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(CanvasError::Api { status, body })
        }
    }
}

/// Extracts the `rel="next"` target from a `Link` header.
fn next_page(headers: &HeaderMap) -> Option<Url> {
    let value = headers.get(LINK)?.to_str().ok()?;
    value.split(',').find_map(|entry| {
        let mut parts = entry.split(';');
        let target = parts.next()?.trim();
        let is_next = parts.any(|param| {
            param
                .trim()
                .strip_prefix("rel=")
                .map(|rel| rel.trim_matches('"') == "next")
                .unwrap_or(false)
        });
        if !is_next {
            return None;
        }
        let target = target.strip_prefix('<')?.strip_suffix('>')?;
        Url::parse(target).ok()
    })
}

impl CourseStatus {
    pub fn matches(&self, course: &Course) -> bool {
        match (self, course.is_completed()) {
            (CourseStatus::All, _) | (_, None) => true,
            (CourseStatus::Completed, Some(completed)) => completed,
            (CourseStatus::Ongoing, Some(completed)) => !completed,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Course {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub course_code: Option<String>,
    #[serde(default)]
    pub start_at: Option<String>,
    #[serde(default)]
    pub end_at: Option<String>,
    #[serde(default)]
    pub course_progress: Option<CourseProgress>,
}

impl Course {
    /// Share of completed requirements, when the course tracks any.
    pub fn progress_ratio(&self) -> Option<f64> {
        let progress = self.course_progress.as_ref()?;
        let required = progress.requirement_count.filter(|count| *count > 0)?;
        let completed = progress.requirement_completed_count.unwrap_or(0);
        Some(f64::from(completed) / f64::from(required))
    }

    pub fn is_completed(&self) -> Option<bool> {
        self.progress_ratio().map(|ratio| ratio >= 1.0)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CourseProgress {
    #[serde(default)]
    pub requirement_count: Option<u32>,
    #[serde(default)]
    pub requirement_completed_count: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Folder {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub parent_folder_id: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct File {
    pub id: u64,
    pub filename: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub folder_id: u64,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub mime_class: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Profile {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub primary_email: Option<String>,
    #[serde(default)]
    pub login_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Quota {
    pub quota: u64,
    pub quota_used: u64,
}
