//! ECR repository and image operations

use async_trait::async_trait;
use aws_sdk_ecr::Client;
use aws_sdk_ecr::types::{ImageIdentifier, Tag};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::{debug, info};

use super::context::{AwsContext, FromAwsContext};
use super::error::{AwsError, AwsResult};
use super::SdkText;

/// One image in a repository, by digest and/or tag
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef {
    pub digest: Option<String>,
    pub tag: Option<String>,
}

/// Short-lived credentials for `docker login`
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
    /// Registry endpoint, e.g. `https://123456789012.dkr.ecr.us-east-1.amazonaws.com`
    pub endpoint: String,
}

impl std::fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("username", &self.username)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

/// Decode an ECR authorization token (`base64("user:password")`).
pub fn decode_authorization_token(
    token: &str,
    endpoint: &str,
) -> AwsResult<RegistryCredentials> {
    let decoded = BASE64
        .decode(token.trim())
        .map_err(|e| AwsError::invalid_request(format!("malformed registry token: {e}")))?;
    let decoded = String::from_utf8(decoded)
        .map_err(|e| AwsError::invalid_request(format!("registry token is not UTF-8: {e}")))?;
    let (username, password) = decoded
        .split_once(':')
        .ok_or_else(|| AwsError::invalid_request("registry token has no user:password pair"))?;

    Ok(RegistryCredentials {
        username: username.to_string(),
        password: password.to_string(),
        endpoint: endpoint.to_string(),
    })
}

/// Container registry control-plane operations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RegistryOperations: Send + Sync {
    /// Create a repository; an existing one is `AwsError::AlreadyExists`
    async fn create_repository(&self, name: &str, tags: &[(String, String)]) -> AwsResult<()>;

    /// Repository URI; a missing repository is `NotFound`
    async fn describe_repository(&self, name: &str) -> AwsResult<String>;

    async fn list_repositories(&self) -> AwsResult<Vec<String>>;

    async fn list_images(&self, repository: &str) -> AwsResult<Vec<ImageRef>>;

    /// Delete up to 100 images; returns the number the service refused
    async fn batch_delete_images(&self, repository: &str, images: &[ImageRef])
    -> AwsResult<usize>;

    async fn delete_repository(&self, name: &str) -> AwsResult<()>;

    async fn authorization_token(&self) -> AwsResult<RegistryCredentials>;
}

/// ECR client
pub struct EcrClient {
    client: Client,
}

impl FromAwsContext for EcrClient {
    fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.ecr_client(),
        }
    }
}

#[async_trait]
impl RegistryOperations for EcrClient {
    async fn create_repository(&self, name: &str, tags: &[(String, String)]) -> AwsResult<()> {
        let tags = tags
            .iter()
            .map(|(key, value)| Tag::builder().key(key).value(value).build())
            .collect::<Result<Vec<_>, _>>()
            .map_err(AwsError::invalid_request)?;

        self.client
            .create_repository()
            .repository_name(name)
            .set_tags(Some(tags))
            .send()
            .await?;

        info!(repository = %name, "Repository created");
        Ok(())
    }

    async fn describe_repository(&self, name: &str) -> AwsResult<String> {
        let output = self
            .client
            .describe_repositories()
            .repository_names(name)
            .send()
            .await?;

        output
            .repositories()
            .first()
            .map(|r| r.repository_uri().text())
            .ok_or_else(|| AwsError::NotFound {
                message: format!("repository {name}"),
            })
    }

    async fn list_repositories(&self) -> AwsResult<Vec<String>> {
        let mut names = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let output = self
                .client
                .describe_repositories()
                .set_next_token(next_token.take())
                .send()
                .await?;

            names.extend(
                output
                    .repositories()
                    .iter()
                    .map(|r| r.repository_name().text()),
            );

            match output.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }

        Ok(names)
    }

    async fn list_images(&self, repository: &str) -> AwsResult<Vec<ImageRef>> {
        let mut images = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let output = self
                .client
                .list_images()
                .repository_name(repository)
                .set_next_token(next_token.take())
                .send()
                .await?;

            images.extend(output.image_ids().iter().map(|id| ImageRef {
                digest: id.image_digest().map(str::to_string),
                tag: id.image_tag().map(str::to_string),
            }));

            match output.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }

        Ok(images)
    }

    async fn batch_delete_images(
        &self,
        repository: &str,
        images: &[ImageRef],
    ) -> AwsResult<usize> {
        let ids = images
            .iter()
            .map(|image| {
                ImageIdentifier::builder()
                    .set_image_digest(image.digest.clone())
                    .set_image_tag(image.tag.clone())
                    .build()
            })
            .collect();

        let output = self
            .client
            .batch_delete_image()
            .repository_name(repository)
            .set_image_ids(Some(ids))
            .send()
            .await?;

        let failures = output.failures().len();
        debug!(
            repository = %repository,
            requested = images.len(),
            failures,
            "Deleted image batch"
        );
        Ok(failures)
    }

    async fn delete_repository(&self, name: &str) -> AwsResult<()> {
        self.client
            .delete_repository()
            .repository_name(name)
            .send()
            .await?;
        info!(repository = %name, "Repository deleted");
        Ok(())
    }

    async fn authorization_token(&self) -> AwsResult<RegistryCredentials> {
        let output = self.client.get_authorization_token().send().await?;

        let data = output
            .authorization_data()
            .first()
            .ok_or_else(|| AwsError::invalid_request("no authorization data returned"))?;

        decode_authorization_token(
            &data.authorization_token().text(),
            &data.proxy_endpoint().text(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_registry_token() {
        let token = BASE64.encode("AWS:secret-password");
        let creds =
            decode_authorization_token(&token, "https://123456789012.dkr.ecr.us-east-1.amazonaws.com")
                .unwrap();
        assert_eq!(creds.username, "AWS");
        assert_eq!(creds.password, "secret-password");
        assert!(!format!("{creds:?}").contains("secret-password"));
    }

    #[test]
    fn rejects_malformed_token() {
        assert!(decode_authorization_token("not base64!!", "e").is_err());
        let no_colon = BASE64.encode("AWSsecret");
        assert!(decode_authorization_token(&no_colon, "e").is_err());
    }
}
