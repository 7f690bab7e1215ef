//! Session Key Generator
//!
//! Prints a fresh 256-bit key for `SESSION_ENCRYPTION_KEY`, which encrypts the
//! X session cached in the SQLite database.

use tweetgate::crypto::{generate_key_hex, SessionCipher};

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    println!("🔐 Session Key Generator");
    println!("========================");
    println!();

    let key = generate_key_hex()?;

    // Make sure the key is accepted before handing it out
    let cipher = SessionCipher::from_hex(&key)?;
    let sample = cipher.encrypt("sample")?;
    if cipher.decrypt(&sample)? != "sample" {
        eprintln!("❌ Error: generated key failed the encryption round trip");
        std::process::exit(1);
    }

    println!("✅ Key generated successfully!");
    println!();
    println!("Add it to your environment:");
    println!("  export SESSION_ENCRYPTION_KEY=\"{}\"", key);
    println!();
    println!("📝 Changing the key later invalidates the cached session; the service");
    println!("   then re-authenticates with the configured tokens.");

    Ok(())
}
