//! Runs one profile through its lifecycle and prints the read model.
//!
//! Uses Postgres when `DATABASE_URL` is set, process memory otherwise.

use anyhow::Context;
use chrono::Utc;
use tracing::{info, warn};

use proofing_core::UserId;
use proofing_infra::{EngineConfig, ProfileEngine};
use proofing_profiles::{
    ActivateProfile, AddProfile, DeactivateProfile, DeactivationReason, IdvLevel, MintProfile, ProfileCommand,
};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let config = EngineConfig::from_env().context("invalid configuration")?;
    proofing_observability::init_with(config.log_format);

    let engine = match config.database_url {
        Some(_) => ProfileEngine::postgres(&config).await.context("failed to start postgres engine")?,
        None => ProfileEngine::in_memory(&config)?,
    };
    info!(mode = ?engine.mode(), "engine ready");

    let created = engine.handle(ProfileCommand::AddProfile(AddProfile {
        profile_id: None,
        user_id: UserId::new(),
        occurred_at: Utc::now(),
    }))?;
    let profile_id = created.aggregate_id;
    info!(%profile_id, version = created.version, "profile added");

    let minted = engine.handle(ProfileCommand::MintProfile(MintProfile {
        profile_id,
        minted_at: Utc::now(),
        idv_level: IdvLevel::UnsupervisedWithSelfie,
    }))?;
    info!(%profile_id, version = minted.version, "profile minted");

    match engine.handle(ProfileCommand::MintProfile(MintProfile {
        profile_id,
        minted_at: Utc::now(),
        idv_level: IdvLevel::InPerson,
    })) {
        Ok(_) => warn!(%profile_id, "second mint unexpectedly accepted"),
        Err(err) => info!(%profile_id, %err, "second mint rejected"),
    }

    engine.handle(ProfileCommand::ActivateProfile(ActivateProfile {
        profile_id,
        activated_at: Utc::now(),
    }))?;
    engine.handle(ProfileCommand::DeactivateProfile(DeactivateProfile {
        profile_id,
        reason: DeactivationReason::PasswordReset,
        occurred_at: Utc::now(),
    }))?;

    // Asynchronous dispatch may still be working through the log.
    engine.catch_up()?;

    let row = engine.profile(profile_id)?.context("profile missing from read model")?;
    println!("{}", serde_json::to_string_pretty(&row)?);

    engine.shutdown();
    Ok(())
}
