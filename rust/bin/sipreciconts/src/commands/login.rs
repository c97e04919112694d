//! Login / logout / whoami.

use std::path::Path;

use anyhow::Result;

use super::{connect, Output};

pub async fn login(login: &str, password: &str, config_path: &Path) -> Result<()> {
    let (ctx, console) = connect(config_path)?;
    let user = console.auth().login(login, password).await?;
    println!("Logged in as {} ({}).", user.display_name(), user.login);
    println!("Session saved for context \"{}\".", ctx.name);
    Ok(())
}

pub async fn logout(config_path: &Path) -> Result<()> {
    let (ctx, console) = connect(config_path)?;
    console.auth().logout().await?;
    println!("Logged out from context \"{}\".", ctx.name);
    Ok(())
}

/// Show the signed-in user after checking the token with the server.
pub async fn whoami(output: Output, config_path: &Path) -> Result<()> {
    let (ctx, console) = connect(config_path)?;
    let auth = console.auth();
    let user = match auth.current_user() {
        Some(user) if auth.validate().await? => user,
        _ => anyhow::bail!("Not logged in to context \"{}\". Run `sipreciconts login`.", ctx.name),
    };

    match output {
        Output::Json => println!("{}", serde_json::to_string_pretty(&user)?),
        Output::Table => {
            println!("Context:  {}", ctx.name);
            println!("User:     {} ({})", user.display_name(), user.login);
            println!("Role:     {}", user.role.as_deref().unwrap_or("-"));
            println!(
                "Company:  {}",
                console.pipeline().company_id().as_deref().unwrap_or("-")
            );
        }
    }
    Ok(())
}
