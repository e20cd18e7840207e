//! Git step construction

use secrecy::{ExposeSecret, SecretString};
use url::Url;

use crate::deploy::runner::{CommandSpec, ToolCommand};
use crate::errors::HookError;

/// Embed the access credential as userinfo of an HTTPS clone URL.
///
/// `https://github.com/acme/site.git` becomes
/// `https://<token>@github.com/acme/site.git`. Without a credential, or for a
/// non-HTTPS remote, the URL is returned unchanged.
pub fn authenticated_url(
    clone_url: &str,
    token: Option<&SecretString>,
) -> Result<String, HookError> {
    let mut url = Url::parse(clone_url)
        .map_err(|e| HookError::InvalidSourceUrl(format!("{clone_url}: {e}")))?;

    let Some(token) = token.map(|t| t.expose_secret()) else {
        return Ok(url.into());
    };
    if token.is_empty() || url.scheme() != "https" {
        return Ok(url.into());
    }

    url.set_username(token)
        .map_err(|_| HookError::InvalidSourceUrl(format!("{clone_url}: cannot carry credentials")))?;
    Ok(url.into())
}

/// Strip any userinfo from a URL before it is shown anywhere
pub fn display_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            let _ = parsed.set_username("");
            let _ = parsed.set_password(None);
            parsed.into()
        }
        Err(_) => "<invalid url>".to_string(),
    }
}

/// `git fetch <url> --tags`, labelled with the credential-free URL
pub fn fetch(git: &ToolCommand, auth_url: &str) -> CommandSpec {
    let spec = git.command(["fetch", auth_url, "--tags"]);
    let label = format!("{} fetch {} --tags", git.program, display_url(auth_url));
    spec.with_label(label)
}

/// `git checkout <revision>`
pub fn checkout(git: &ToolCommand, revision: &str) -> CommandSpec {
    git.command(["checkout", revision])
}
