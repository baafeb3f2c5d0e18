//! Credential and key-material resolution from opaque secrets.

use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};

use crate::Error;
use crate::api::{EncryptionSpec, RecipientSpec, RecipientType};

/// Git credentials resolved from the auth secret.
///
/// Recognized keys: `token`, or the `username`/`password` pair. When both
/// are present the token wins.
#[derive(Debug, Clone, Default)]
pub struct GitCredentials {
    pub token: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl GitCredentials {
    /// Userinfo injected into an HTTPS remote URL.
    pub fn userinfo(&self) -> Option<(String, String)> {
        if let Some(token) = &self.token {
            return Some(("git".to_string(), token.clone()));
        }
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => Some((user.clone(), pass.clone())),
            _ => None,
        }
    }

    /// The token used against the forge API.
    pub fn forge_token(&self) -> Option<&str> {
        self.token.as_deref().or(self.password.as_deref())
    }
}

/// Resolve the auth secret for an object.
pub async fn resolve_auth(
    client: &Client,
    namespace: &str,
    secret_name: &str,
    secret_key: Option<&str>,
) -> Result<GitCredentials, Error> {
    let secret = fetch_secret(client, namespace, secret_name).await?;

    if let Some(key) = secret_key {
        let token = secret_string(&secret, key).ok_or_else(|| {
            Error::AuthResolution(format!(
                "secret {namespace}/{secret_name} has no key {key:?}"
            ))
        })?;
        return Ok(GitCredentials {
            token: Some(token),
            ..Default::default()
        });
    }

    let credentials = GitCredentials {
        token: secret_string(&secret, "token"),
        username: secret_string(&secret, "username"),
        password: secret_string(&secret, "password"),
    };

    if credentials.token.is_none()
        && (credentials.username.is_none() || credentials.password.is_none())
    {
        return Err(Error::AuthResolution(format!(
            "secret {namespace}/{secret_name} carries neither token nor username/password"
        )));
    }

    Ok(credentials)
}

/// Resolve the recipient set of an encryption spec, fetching secret-held
/// recipient strings as needed.
pub async fn resolve_recipients(
    client: &Client,
    namespace: &str,
    spec: &EncryptionSpec,
) -> Result<Vec<gitchange_encrypt::Recipient>, Error> {
    let mut recipients = Vec::with_capacity(spec.recipients.len());
    for recipient in &spec.recipients {
        recipients.push(resolve_recipient(client, namespace, recipient).await?);
    }
    Ok(recipients)
}

async fn resolve_recipient(
    client: &Client,
    namespace: &str,
    spec: &RecipientSpec,
) -> Result<gitchange_encrypt::Recipient, Error> {
    // An inline value wins over a secret reference.
    let value = match (&spec.value, &spec.secret_ref) {
        (Some(value), _) => value.clone(),
        (None, Some(secret_ref)) => {
            let secret = fetch_secret(client, namespace, &secret_ref.name).await?;
            secret_string(&secret, &secret_ref.key).ok_or_else(|| {
                Error::Validation(format!(
                    "recipient secret {namespace}/{} has no key {:?}",
                    secret_ref.name, secret_ref.key
                ))
            })?
        }
        (None, None) => {
            return Err(Error::Validation(
                "encryption recipient needs either value or secretRef".into(),
            ));
        }
    };

    Ok(match spec.r#type {
        RecipientType::Age => gitchange_encrypt::Recipient::Age(value),
        RecipientType::Ssh => gitchange_encrypt::Recipient::Ssh(value),
        RecipientType::Passphrase => gitchange_encrypt::Recipient::Passphrase(value),
    })
}

async fn fetch_secret(client: &Client, namespace: &str, name: &str) -> Result<Secret, Error> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    api.get(name).await.map_err(|e| match &e {
        kube::Error::Api(response) if response.code == 404 => {
            Error::AuthResolution(format!("secret {namespace}/{name} not found"))
        }
        _ => Error::AuthResolution(format!("failed to read secret {namespace}/{name}: {e}")),
    })
}

fn secret_string(secret: &Secret, key: &str) -> Option<String> {
    if let Some(data) = &secret.data {
        if let Some(bytes) = data.get(key) {
            return String::from_utf8(bytes.0.clone()).ok();
        }
    }
    if let Some(string_data) = &secret.string_data {
        if let Some(value) = string_data.get(key) {
            return Some(value.clone());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;

    fn secret_with(data: &[(&str, &str)]) -> Secret {
        let map: BTreeMap<String, ByteString> = data
            .iter()
            .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
            .collect();
        Secret {
            data: Some(map),
            ..Default::default()
        }
    }

    #[test]
    fn token_wins_over_username_password() {
        let credentials = GitCredentials {
            token: Some("tok".into()),
            username: Some("u".into()),
            password: Some("p".into()),
        };
        assert_eq!(
            credentials.userinfo(),
            Some(("git".to_string(), "tok".to_string()))
        );
        assert_eq!(credentials.forge_token(), Some("tok"));
    }

    #[test]
    fn username_password_pair_is_used_without_token() {
        let credentials = GitCredentials {
            token: None,
            username: Some("u".into()),
            password: Some("p".into()),
        };
        assert_eq!(
            credentials.userinfo(),
            Some(("u".to_string(), "p".to_string()))
        );
        assert_eq!(credentials.forge_token(), Some("p"));
    }

    #[test]
    fn missing_credentials_yield_none() {
        assert_eq!(GitCredentials::default().userinfo(), None);
        assert_eq!(GitCredentials::default().forge_token(), None);
    }

    #[test]
    fn secret_string_reads_data_and_string_data() {
        let secret = secret_with(&[("token", "abc")]);
        assert_eq!(secret_string(&secret, "token"), Some("abc".to_string()));
        assert_eq!(secret_string(&secret, "missing"), None);

        let secret = Secret {
            string_data: Some(BTreeMap::from([("token".to_string(), "xyz".to_string())])),
            ..Default::default()
        };
        assert_eq!(secret_string(&secret, "token"), Some("xyz".to_string()));
    }
}
