//! Print the `OpenAPI` document as JSON.

use anyhow::Result;

fn main() -> Result<()> {
    println!("{}", guestbook::api::openapi().to_pretty_json()?);
    Ok(())
}
