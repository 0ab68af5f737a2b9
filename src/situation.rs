/*!
État "situation" du processus : position, vitesse, altitude, attitude.

Deux sous-enregistrements logiquement indépendants, chacun sous son
propre mutex, pour que la boucle attitude à 500 Hz n'entre jamais en
contention avec le parseur GPS. Le parseur publie par transaction :
copie de travail, mutation, réécriture complète sous le verrou GPS.
Un lecteur voit tous les champs d'une trame acceptée, ou aucun.
*/

use crate::clock::ClockSource;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Une trame NMEA valide doit avoir été vue il y a moins de 5 s
const NMEA_LIVENESS: Duration = Duration::from_secs(5);

/// Un fix, une route sol ou une heure GPS de plus de 15 s est périmé
const GPS_STALENESS: Duration = Duration::from_secs(15);

/// L'attitude est un signal temps réel : périmée au-delà d'une seconde
const ATTITUDE_STALENESS: Duration = Duration::from_secs(1);

/// Sous-enregistrement GPS de la situation
#[derive(Debug, Clone, Default)]
pub struct GpsSituation {
    /// Heure du dernier fix, secondes depuis minuit UTC
    pub last_fix_since_midnight_utc: f32,

    /// Latitude, degrés décimaux signés
    pub lat: f32,

    /// Longitude, degrés décimaux signés
    pub lng: f32,

    /// 0 = pas de fix, 1 = 3D, 2 = DGPS/SBAS, 6 = estime
    pub quality: u8,

    /// Hauteur au-dessus de l'ellipsoïde WGS-84, pieds
    pub height_above_ellipsoid: f32,

    /// Séparation du géoïde, pieds (HAE moins MSL)
    pub geoid_sep: f32,

    /// Satellites utilisés dans la solution
    pub satellites: u16,

    /// Satellites poursuivis (almanach reçu)
    pub satellites_tracked: u16,

    /// Satellites vus (signal reçu)
    pub satellites_seen: u16,

    /// Confiance horizontale à 95 %, mètres
    pub accuracy: f32,

    /// Catégorie d'intégrité NACp (AC 20-165A), 0-11
    pub nacp: u8,

    /// Altitude MSL, pieds (HAE moins séparation du géoïde)
    pub alt: f32,

    /// Confiance verticale à 95 %, mètres
    pub accuracy_vert: f32,

    /// Vitesse verticale GPS, pieds/seconde, positive vers le haut
    pub gps_vert_vel: f32,

    /// Instant monotone du dernier fix
    pub last_fix_local_time: Duration,

    /// Route vraie, degrés 0-360
    pub true_course: f32,

    /// Vitesse sol, nœuds entiers
    pub ground_speed: u16,

    /// Instant monotone de la dernière route sol
    pub last_ground_track_time: Duration,

    /// Heure murale GPS complète (PUBX,04 ou RMC)
    pub gps_time: Option<DateTime<Utc>>,

    /// Instant monotone de la dernière heure GPS reçue
    pub last_gps_time_time: Duration,

    /// Instant monotone de la dernière trame NMEA valide
    pub last_valid_nmea_message_time: Duration,

    /// Dernière trame NMEA valide, texte brut
    pub last_valid_nmea_message: String,
}

/// Sous-enregistrement attitude/environnement de la situation
#[derive(Debug, Clone, Default)]
pub struct AttitudeSituation {
    /// Température, °C (baromètre)
    pub temperature: f64,

    /// Altitude pression, pieds
    pub pressure_alt: f64,

    /// Assiette longitudinale, degrés
    pub pitch: f64,

    /// Inclinaison latérale, degrés
    pub roll: f64,

    /// Lacet, degrés
    pub yaw: f64,

    /// Cap gyroscopique, degrés
    pub gyro_heading: f64,

    /// Instant monotone du dernier échantillon température/pression
    pub last_temp_press_time: Duration,

    /// Instant monotone du dernier échantillon d'attitude
    pub last_attitude_time: Duration,
}

/// Situation partagée du processus
///
/// Les deux mutex sont volontairement disjoints ; aucune tâche ne doit
/// détenir les deux à la fois.
pub struct Situation {
    gps: Mutex<GpsSituation>,
    attitude: Mutex<AttitudeSituation>,
}

impl Situation {
    pub fn new() -> Self {
        Situation {
            gps: Mutex::new(GpsSituation::default()),
            attitude: Mutex::new(AttitudeSituation::default()),
        }
    }

    /// Instantané du sous-enregistrement GPS
    pub fn gps_snapshot(&self) -> GpsSituation {
        self.gps.lock().unwrap().clone()
    }

    /// Publication atomique d'une copie de travail acceptée
    pub fn commit_gps(&self, scratch: GpsSituation) {
        *self.gps.lock().unwrap() = scratch;
    }

    /// Mise à jour ciblée du sous-enregistrement GPS
    pub fn with_gps<F>(&self, f: F)
    where
        F: FnOnce(&mut GpsSituation),
    {
        f(&mut self.gps.lock().unwrap());
    }

    /// Instantané du sous-enregistrement attitude
    pub fn attitude_snapshot(&self) -> AttitudeSituation {
        self.attitude.lock().unwrap().clone()
    }

    /// Mise à jour du sous-enregistrement attitude
    pub fn with_attitude<F>(&self, f: F)
    where
        F: FnOnce(&mut AttitudeSituation),
    {
        f(&mut self.attitude.lock().unwrap());
    }

    /// Vrai si une trame NMEA valide a été vue récemment
    ///
    /// La vivacité dépend de n'importe quelle trame au checksum correct,
    /// pas de son acceptation par un décodeur.
    pub fn is_gps_connected(&self, clock: &dyn ClockSource) -> bool {
        let gps = self.gps.lock().unwrap();
        clock.since(gps.last_valid_nmea_message_time) < NMEA_LIVENESS
    }

    /// Vrai si un fix valide a été vu dans les 15 dernières secondes
    ///
    /// Le chemin faux force `quality = 0` et `satellites = 0` avant de
    /// retourner : un consommateur en retard voit un "pas de fix"
    /// explicite, jamais la dernière bonne valeur.
    pub fn is_gps_valid(&self, clock: &dyn ClockSource, gps_connected: bool) -> bool {
        let mut gps = self.gps.lock().unwrap();
        if clock.since(gps.last_fix_local_time) < GPS_STALENESS
            && gps_connected
            && gps.quality > 0
        {
            true
        } else {
            gps.quality = 0;
            gps.satellites = 0;
            false
        }
    }

    pub fn is_gps_ground_track_valid(&self, clock: &dyn ClockSource) -> bool {
        let gps = self.gps.lock().unwrap();
        clock.since(gps.last_ground_track_time) < GPS_STALENESS
    }

    pub fn is_gps_clock_valid(&self, clock: &dyn ClockSource) -> bool {
        let gps = self.gps.lock().unwrap();
        clock.since(gps.last_gps_time_time) < GPS_STALENESS
    }

    pub fn is_ahrs_valid(&self, clock: &dyn ClockSource) -> bool {
        let attitude = self.attitude.lock().unwrap();
        clock.since(attitude.last_attitude_time) < ATTITUDE_STALENESS
    }

    pub fn is_temp_press_valid(&self, clock: &dyn ClockSource) -> bool {
        let attitude = self.attitude.lock().unwrap();
        clock.since(attitude.last_temp_press_time) < GPS_STALENESS
    }
}

impl Default for Situation {
    fn default() -> Self {
        Self::new()
    }
}

/// Réglages observés par les boucles (équivalents des options runtime)
pub struct Settings {
    /// Sous-système GPS actif
    pub gps_enabled: AtomicBool,

    /// Sous-système AHRS (IMU + baromètre) actif
    pub ahrs_enabled: AtomicBool,

    /// Journalisation détaillée trame par trame
    pub debug: AtomicBool,

    /// Rapport texte FF-sim en plus de la trame GDL90 (débogage AHRS)
    pub ahrs_ffsim: AtomicBool,
}

impl Settings {
    pub fn new(gps_enabled: bool, ahrs_enabled: bool, debug: bool, ahrs_ffsim: bool) -> Self {
        Settings {
            gps_enabled: AtomicBool::new(gps_enabled),
            ahrs_enabled: AtomicBool::new(ahrs_enabled),
            debug: AtomicBool::new(debug),
            ahrs_ffsim: AtomicBool::new(ahrs_ffsim),
        }
    }

    pub fn debug(&self) -> bool {
        self.debug.load(Ordering::Relaxed)
    }
}

/// Drapeaux de connexion des sous-systèmes, pilotés par le superviseur
/// et les boucles elles-mêmes
pub struct Status {
    pub gps_connected: AtomicBool,
    pub ahrs_connected: AtomicBool,
}

impl Status {
    pub fn new() -> Self {
        Status {
            gps_connected: AtomicBool::new(false),
            ahrs_connected: AtomicBool::new(false),
        }
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimulatedClock;

    #[test]
    fn test_gps_invalid_forces_no_fix() {
        let clock = SimulatedClock::new();
        let situation = Situation::new();

        situation.with_gps(|gps| {
            gps.quality = 2;
            gps.satellites = 9;
            gps.last_fix_local_time = clock.monotonic();
        });
        assert!(situation.is_gps_valid(&clock, true));

        clock.advance(Duration::from_secs(16));
        assert!(!situation.is_gps_valid(&clock, true));

        // Effet de bord obligatoire du chemin faux
        let gps = situation.gps_snapshot();
        assert_eq!(gps.quality, 0);
        assert_eq!(gps.satellites, 0);
    }

    #[test]
    fn test_gps_invalid_without_hardware_flag() {
        let clock = SimulatedClock::new();
        let situation = Situation::new();

        situation.with_gps(|gps| {
            gps.quality = 1;
            gps.satellites = 5;
            gps.last_fix_local_time = clock.monotonic();
        });
        // Fix frais mais matériel déclaré absent
        assert!(!situation.is_gps_valid(&clock, false));
        assert_eq!(situation.gps_snapshot().quality, 0);
    }

    #[test]
    fn test_gps_connected_tracks_any_valid_sentence() {
        let clock = SimulatedClock::new();
        let situation = Situation::new();

        assert!(!situation.is_gps_connected(&clock));
        situation.with_gps(|gps| gps.last_valid_nmea_message_time = clock.monotonic());
        assert!(situation.is_gps_connected(&clock));

        clock.advance(Duration::from_secs(6));
        assert!(!situation.is_gps_connected(&clock));
    }

    #[test]
    fn test_ahrs_staleness_is_one_second() {
        let clock = SimulatedClock::new();
        let situation = Situation::new();

        situation.with_attitude(|attitude| attitude.last_attitude_time = clock.monotonic());
        assert!(situation.is_ahrs_valid(&clock));

        clock.advance(Duration::from_millis(1100));
        assert!(!situation.is_ahrs_valid(&clock));
    }

    #[test]
    fn test_temp_press_staleness() {
        let clock = SimulatedClock::new();
        let situation = Situation::new();

        situation.with_attitude(|attitude| attitude.last_temp_press_time = clock.monotonic());
        clock.advance(Duration::from_secs(14));
        assert!(situation.is_temp_press_valid(&clock));
        clock.advance(Duration::from_secs(2));
        assert!(!situation.is_temp_press_valid(&clock));
    }

    #[test]
    fn test_commit_is_whole_record() {
        let situation = Situation::new();
        let mut scratch = situation.gps_snapshot();
        scratch.lat = 48.0;
        scratch.lng = -2.5;
        scratch.quality = 1;
        situation.commit_gps(scratch);

        let gps = situation.gps_snapshot();
        assert_eq!(gps.lat, 48.0);
        assert_eq!(gps.lng, -2.5);
        assert_eq!(gps.quality, 1);
    }
}
