//! Companion CLI for the build-time authentication descriptor generator
//! (spec.md §6). Out of scope for the engine itself, but shares its codec
//! and authenticator logic through the library crate.

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use log::info;
use rs_uefi_varstore::guid::EFI_GLOBAL_VARIABLE;
use rs_uefi_varstore::sign::{build_auth_descriptor, SigningIdentity};
use rsa::pkcs8::DecodePrivateKey;
use rsa::RsaPrivateKey;

/// Produce an `EFI_VARIABLE_AUTHENTICATION_2` descriptor for provisioning
/// a Secure Boot variable ahead of guest boot.
#[derive(Parser)]
#[command(name = "sign-authvar")]
struct Args {
    /// Variable name: PK, KEK, db, dbx, or any other UEFI variable name.
    #[arg(long)]
    name: String,

    /// PKCS#8 PEM private key used to sign.
    #[arg(long)]
    key: PathBuf,

    /// DER-encoded X.509 certificate matching `--key`.
    #[arg(long)]
    cert: PathBuf,

    /// Raw payload to wrap (an EFI_SIGNATURE_LIST for PK/KEK/db/dbx).
    #[arg(long)]
    payload: PathBuf,

    /// Output path for the assembled descriptor.
    #[arg(long)]
    out: PathBuf,

    /// Attribute bits, default NV+BS+RT+TBAW (0x27).
    #[arg(long, default_value_t = 0x27)]
    attributes: u32,

    /// Timestamp year/month/day/hour/minute/second. The caller supplies
    /// these explicitly rather than the tool stamping "now", so that a
    /// provisioning pipeline can reproduce byte-identical descriptors
    /// across runs.
    #[arg(long)]
    year: u16,
    #[arg(long)]
    month: u8,
    #[arg(long)]
    day: u8,
    #[arg(long, default_value_t = 0)]
    hour: u8,
    #[arg(long, default_value_t = 0)]
    minute: u8,
    #[arg(long, default_value_t = 0)]
    second: u8,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let key_pem = fs::read_to_string(&args.key)?;
    let private_key = RsaPrivateKey::from_pkcs8_pem(&key_pem)
        .map_err(|e| anyhow::anyhow!("could not parse private key: {e}"))?;
    let certificate_der = fs::read(&args.cert)?;
    let payload = fs::read(&args.payload)?;

    let vendor_guid = match args.name.as_str() {
        "PK" => EFI_GLOBAL_VARIABLE,
        "KEK" => EFI_GLOBAL_VARIABLE,
        "db" | "dbx" | "dbt" | "dbr" => {
            rs_uefi_varstore::guid::EFI_IMAGE_SECURITY_DATABASE
        }
        _ => EFI_GLOBAL_VARIABLE,
    };
    let identity = SigningIdentity {
        private_key,
        certificate_der,
    };
    let name_units = rs_uefi_varstore::ucs2::encode_ascii(&args.name);
    let timestamp = rs_uefi_varstore::codec::EfiTime {
        year: args.year,
        month: args.month,
        day: args.day,
        hour: args.hour,
        minute: args.minute,
        second: args.second,
        ..rs_uefi_varstore::codec::EfiTime::ZERO
    };

    let descriptor = build_auth_descriptor(
        &identity,
        &name_units,
        &vendor_guid,
        args.attributes,
        timestamp,
        &payload,
    )
    .map_err(|e| anyhow::anyhow!("could not build descriptor: {e}"))?;

    fs::write(&args.out, &descriptor)?;
    info!("wrote {} bytes to {}", descriptor.len(), args.out.display());
    Ok(())
}
