use std::io::{self, Write};

use anyhow::{Context, Result};
use photopass_core::auth::token;
use photopass_core::{ApiClient, ApiError, ApiRequest, Config};
use serde_json::Value;
use tracing::info;

use crate::cli::{GetArgs, LoginArgs};

fn prompt_email(default: Option<&str>) -> Result<String> {
    match default {
        Some(d) => print!("Email [{}]: ", d),
        None => print!("Email: "),
    }
    io::stdout().flush()?;
    let mut email = String::new();
    io::stdin().read_line(&mut email)?;
    let email = email.trim();
    match (email.is_empty(), default) {
        (true, Some(d)) => Ok(d.to_string()),
        (true, None) => anyhow::bail!("Email is required"),
        (false, _) => Ok(email.to_string()),
    }
}

pub async fn login(api: &ApiClient, config: &mut Config, args: &LoginArgs) -> Result<()> {
    let email = match args.email {
        Some(ref email) => email.clone(),
        None => prompt_email(config.last_email.as_deref())?,
    };
    let password = rpassword::prompt_password("Password: ").context("Failed to read password")?;

    let user = api.sign_in(&email, &password).await?;
    info!(user_id = %user.id, "Signed in");

    config.last_email = Some(email);
    config.save().context("Failed to save config")?;

    println!("Signed in as {} <{}> ({})", user.display_name, user.email, user.role());
    Ok(())
}

pub fn logout(api: &ApiClient) {
    api.sign_out();
    println!("Signed out");
}

pub async fn whoami(api: &ApiClient) -> Result<()> {
    if api.session().credentials().is_none() {
        anyhow::bail!("Not signed in. Run `photopass login` first.");
    }
    // An expired access token is fine here; the request refreshes it.
    let user = api.fetch_current_user().await.map_err(sign_in_hint)?;
    println!("{} <{}>", user.display_name, user.email);
    println!("id:   {}", user.id);
    println!("role: {}", user.role());
    Ok(())
}

/// Report the stored session without touching the network or the store.
pub fn status(api: &ApiClient) {
    let session = api.session();
    let Some(credentials) = session.credentials() else {
        println!("Not signed in");
        return;
    };
    if let Some(user) = session.current_user() {
        println!("Signed in as {} ({})", user.email, user.role());
    }
    if token::is_valid(&credentials.access_token) {
        println!(
            "Access token expires in {}m",
            token::minutes_until_expiry(&credentials.access_token)
        );
    } else if credentials.refresh_token.is_some() {
        println!("Access token expired; it will be refreshed on the next request");
    } else {
        println!("Access token expired; run `photopass login` to sign in again");
    }
}

pub async fn get(api: &ApiClient, args: &GetArgs) -> Result<()> {
    let mut request = ApiRequest::get(args.path.as_str());
    for (key, value) in &args.query {
        request = request.query(key.as_str(), value.as_str());
    }
    let response = api.execute(request).await.map_err(sign_in_hint)?;
    let body: Value = response.json().await.context("Response was not JSON")?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

fn sign_in_hint(e: ApiError) -> anyhow::Error {
    if e.requires_sign_in() {
        anyhow::anyhow!("{}. Run `photopass login` to sign in again.", e)
    } else {
        e.into()
    }
}
