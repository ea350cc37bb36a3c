use super::handlers::{auth, health};
use utoipa::openapi::{Contact, InfoBuilder, License, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    // Reuse the same router wiring and only return the generated OpenAPI spec.
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Add new endpoints here via `.routes(routes!(...))` so they are both served
/// and included in the generated `OpenAPI` spec.
/// Routes added outside (like `/`) are intentionally not documented.
pub(crate) fn api_router() -> OpenApiRouter {
    // `routes!` reads #[utoipa::path] to bind HTTP method + path and add the route to OpenAPI.
    OpenApiRouter::with_openapi(cargo_openapi())
        .routes(routes!(health::health))
        .routes(routes!(auth::register::register))
        .routes(routes!(auth::login::login))
        .routes(routes!(auth::refresh::refresh))
        .routes(routes!(auth::refresh::logout))
        .routes(routes!(auth::refresh::logout_all))
        .routes(routes!(auth::mfa::mfa_setup))
        .routes(routes!(auth::mfa::mfa_enable))
        .routes(routes!(auth::mfa::mfa_disable))
        .routes(routes!(auth::mfa::mfa_verify))
        .routes(routes!(auth::oauth::authorization_url))
        .routes(routes!(auth::oauth::callback))
        .routes(routes!(auth::oauth::unlink))
        .routes(routes!(auth::reset::forgot_password))
        .routes(routes!(auth::reset::reset_password))
        .routes(routes!(auth::reset::validate_reset_token))
        .routes(routes!(auth::device::list_devices))
        .routes(routes!(auth::device::trust_device))
        .routes(routes!(auth::device::revoke_device_trust))
        .routes(routes!(auth::device::block_device))
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    // Use Cargo.toml metadata instead of the utoipa-axum crate info defaults.
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = cargo_license();

    OpenApiBuilder::new().info(info).tags(Some(tags())).build()
}

fn tags() -> Vec<Tag> {
    let mut auth_tag = Tag::new("auth");
    auth_tag.description =
        Some("Registration, login, token refresh, and session lifecycle".to_string());

    let mut mfa_tag = Tag::new("mfa");
    mfa_tag.description = Some("Second factor enrollment and verification".to_string());

    let mut oauth_tag = Tag::new("oauth");
    oauth_tag.description = Some("External identity linking".to_string());

    let mut device_tag = Tag::new("devices");
    device_tag.description = Some("Device trust management".to_string());

    vec![auth_tag, mfa_tag, oauth_tag, device_tag]
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let authors = env!("CARGO_PKG_AUTHORS");
    let primary = authors.split(';').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    if let Some(start) = author.find('<') {
        if let Some(end) = author.rfind('>') {
            if end > start {
                let name = author[..start].trim();
                let email = author[start + 1..end].trim();
                return (
                    (!name.is_empty()).then_some(name),
                    (!email.is_empty()).then_some(email),
                );
            }
        }
    }
    let trimmed = author.trim();
    ((!trimmed.is_empty()).then_some(trimmed), None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_contains_core_routes() {
        let doc = openapi();
        let paths = &doc.paths.paths;
        assert!(paths.contains_key("/v1/auth/register"));
        assert!(paths.contains_key("/v1/auth/login"));
        assert!(paths.contains_key("/v1/auth/refresh"));
        assert!(paths.contains_key("/v1/auth/mfa/verify"));
        assert!(paths.contains_key("/v1/auth/oauth/{provider}/url"));
        assert!(paths.contains_key("/health"));
    }

    #[test]
    fn openapi_carries_endpoint_tags() {
        let doc = openapi();
        let tags = doc.tags.expect("tags");
        let names: Vec<&str> = tags.iter().map(|tag| tag.name.as_str()).collect();
        assert_eq!(names, ["auth", "mfa", "oauth", "devices"]);
    }

    #[test]
    fn parse_author_splits_name_and_email() {
        let (name, email) = parse_author("Team Janua <team@janua.dev>");
        assert_eq!(name, Some("Team Janua"));
        assert_eq!(email, Some("team@janua.dev"));
    }

    #[test]
    fn parse_author_name_only() {
        let (name, email) = parse_author("Team Janua");
        assert_eq!(name, Some("Team Janua"));
        assert_eq!(email, None);
    }
}
