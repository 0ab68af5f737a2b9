use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

/// Trait pour les sources de temps du démon
///
/// Toutes les décisions de fraîcheur (validité GPS, vieillissement des
/// satellites) sont prises sur l'horloge monotone, jamais sur l'horloge
/// murale : le démon peut lui-même modifier l'heure système via `date -s`.
pub trait ClockSource: Send + Sync {
    /// Temps monotone écoulé depuis le démarrage du démon
    fn monotonic(&self) -> Duration;

    /// Heure murale UTC (sujette aux sauts : synchronisation GPS, NTP...)
    fn wall(&self) -> DateTime<Utc>;

    /// Durée écoulée depuis un instant monotone antérieur
    ///
    /// Un instant jamais posé (zéro) est infiniment ancien : au
    /// démarrage, rien n'est frais.
    fn since(&self, earlier: Duration) -> Duration {
        if earlier == Duration::ZERO {
            return Duration::MAX;
        }
        self.monotonic().saturating_sub(earlier)
    }
}

/// Horloge système réelle
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockSource for SystemClock {
    fn monotonic(&self) -> Duration {
        self.start.elapsed()
    }

    fn wall(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Horloge simulée pour les tests : avance manuelle, heure murale posée
#[cfg(test)]
pub struct SimulatedClock {
    now: std::sync::Mutex<Duration>,
    wall: std::sync::Mutex<DateTime<Utc>>,
}

#[cfg(test)]
impl SimulatedClock {
    pub fn new() -> Self {
        SimulatedClock {
            now: std::sync::Mutex::new(Duration::from_secs(1)),
            wall: std::sync::Mutex::new(Utc::now()),
        }
    }

    /// Avance le temps monotone (et l'heure murale d'autant)
    pub fn advance(&self, d: Duration) {
        *self.now.lock().unwrap() += d;
        let mut wall = self.wall.lock().unwrap();
        *wall = *wall + chrono::TimeDelta::from_std(d).unwrap();
    }

    pub fn set_wall(&self, t: DateTime<Utc>) {
        *self.wall.lock().unwrap() = t;
    }
}

#[cfg(test)]
impl ClockSource for SimulatedClock {
    fn monotonic(&self) -> Duration {
        *self.now.lock().unwrap()
    }

    fn wall(&self) -> DateTime<Utc> {
        *self.wall.lock().unwrap()
    }
}
