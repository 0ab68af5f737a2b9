use crate::clock::ClockSource;
use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use std::process::Command;
use tracing::{error, info};

/// Dérive maximale tolérée entre l'heure hôte et l'heure GPS, secondes
const MAX_DRIFT_SECS: i64 = 3;

/// Capacité de réglage de l'heure système
///
/// Modifier l'heure hôte est un effet de bord privilégié ; l'injecter
/// permet aux tests de l'observer sans toucher la machine.
pub trait TimeSetter: Send + Sync {
    fn set_system_time(&self, when: DateTime<Utc>) -> Result<()>;
}

/// Implémentation réelle : commande `date -s "<YYYYMMDD HH:MM:SS.mmm> UTC"`
pub struct OsDateSetter;

impl TimeSetter for OsDateSetter {
    fn set_system_time(&self, when: DateTime<Utc>) -> Result<()> {
        let formatted = format!("{} UTC", when.format("%Y%m%d %H:%M:%S%.3f"));
        let status = Command::new("date")
            .arg("-s")
            .arg(&formatted)
            .status()
            .context("Failed to run date command")?;
        if !status.success() {
            anyhow::bail!("date -s exited with {}", status);
        }
        Ok(())
    }
}

/// Règle l'heure système si l'heure GPS diverge de plus de 3 s
///
/// L'échec n'est jamais fatal : la prochaine trame PUBX,04 ou RMC
/// retentera si la dérive persiste. Retourne vrai si la commande a été
/// invoquée.
pub fn sync_system_time(
    clock: &dyn ClockSource,
    setter: &dyn TimeSetter,
    gps_time: DateTime<Utc>,
) -> bool {
    let max_drift = TimeDelta::seconds(MAX_DRIFT_SECS);
    let drift = clock.wall() - gps_time;
    if drift > max_drift || drift < -max_drift {
        info!(
            "setting system time to: '{} UTC'",
            gps_time.format("%Y%m%d %H:%M:%S%.3f")
        );
        match setter.set_system_time(gps_time) {
            Ok(()) => info!("Time set from GPS. Current time is {}", clock.wall()),
            Err(e) => error!("Set Date failure: {:#}", e),
        }
        true
    } else {
        false
    }
}

/// Fausse capacité pour les tests : enregistre les invocations
#[cfg(test)]
pub struct RecordingTimeSetter {
    pub calls: std::sync::Mutex<Vec<DateTime<Utc>>>,
}

#[cfg(test)]
impl RecordingTimeSetter {
    pub fn new() -> Self {
        RecordingTimeSetter {
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[cfg(test)]
impl TimeSetter for RecordingTimeSetter {
    fn set_system_time(&self, when: DateTime<Utc>) -> Result<()> {
        self.calls.lock().unwrap().push(when);
        Ok(())
    }
}
