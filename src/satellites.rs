/*!
Suivi de la constellation satellite.

Trois familles de trames se recouvrent (PUBX,03 ; GSA ; GSV) et ne sont
pas d'accord sur la numérotation des satellites SBAS (NMEA 33-54 contre
PRN 120-161). La forme canonique interne est le PRN : l'identifiant
`S138` désigne WAAS 138 quel que soit le codage de la trame source.
L'identifiant NMEA est conservé à part pour la compatibilité filaire.
*/

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Un enregistrement satellite est supprimé si non suivi depuis 10 s
const TRACK_EXPIRY: Duration = Duration::from_secs(10);

/// `in_solution` est forcé à faux si aucune solution depuis 5 s
const SOLUTION_EXPIRY: Duration = Duration::from_secs(5);

/// Famille d'un satellite, déduite de son identifiant NMEA
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SatFamily {
    /// GPxxx ; NMEA 1-32
    Gps,
    /// NMEA 33-54 ou PRN 120-161 (WAAS, EGNOS, MSAS...)
    Sbas,
    /// GLxxx ; NMEA 65-96
    Glonass,
    /// Réservé, aucune trame ne l'assigne pour l'instant
    #[allow(dead_code)]
    Galileo,
    /// Réservé, aucune trame ne l'assigne pour l'instant
    #[allow(dead_code)]
    Beidou,
    /// Identifiant hors des plages connues
    Unknown,
}

/// État de poursuite d'un satellite
#[derive(Debug, Clone)]
pub struct SatelliteInfo {
    /// Identifiant NMEA filaire (1-32 GPS, 33-54 SBAS, 65-96 GLONASS)
    pub nmea_id: u8,

    /// Code source + PRN, ex: S138 == WAAS 138, G2 == GPS 2
    pub sat_id: String,

    /// Élévation au-dessus de l'horizon local, degrés (-999 = inconnue)
    pub elevation: i16,

    /// Azimut vrai, 0-359 degrés (-999 = inconnu)
    pub azimuth: i16,

    /// Force du signal, dB-Hz (-99 = non reçu, -999 = inconnue)
    pub signal: i8,

    /// Famille (GPS, SBAS, GLONASS...)
    pub family: SatFamily,

    /// Vrai si le satellite participe à la solution de position
    pub in_solution: bool,

    /// Instant monotone de la dernière participation à une solution
    pub time_last_solution: Duration,

    /// Instant monotone du dernier signal reçu
    pub time_last_seen: Duration,

    /// Instant monotone de la dernière poursuite (données d'almanach)
    pub time_last_tracked: Duration,
}

/// Compteurs agrégés publiés dans la situation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConstellationCounts {
    /// Satellites participant à la solution
    pub in_solution: u16,

    /// Satellites poursuivis (almanach frais)
    pub tracked: u16,

    /// Satellites avec un signal > 0 dB-Hz
    pub seen: u16,
}

/// Traduit un identifiant NMEA brut en (famille, identifiant canonique,
/// identifiant NMEA conservé)
///
/// Règle SBAS : PRN = NMEA + 87 pour 33-54 ; les trames PUBX,03 émettent
/// déjà le PRN (120-161), converti en sens inverse pour le champ NMEA.
pub fn designate(sv: u16) -> (SatFamily, String, u8) {
    if sv < 33 {
        (SatFamily::Gps, format!("G{}", sv), sv as u8)
    } else if sv < 65 {
        (SatFamily::Sbas, format!("S{}", sv + 87), sv as u8)
    } else if sv < 97 {
        (SatFamily::Glonass, format!("R{}", sv - 64), sv as u8)
    } else if (120..162).contains(&sv) {
        (SatFamily::Sbas, format!("S{}", sv), (sv - 87) as u8)
    } else {
        (SatFamily::Unknown, format!("U{}", sv), sv.min(255) as u8)
    }
}

/// Carte canonique des satellites, protégée par son propre mutex
///
/// Les écrivains (toutes les branches satellite du parseur) passent par
/// [`Constellation::update`] qui fait la lecture-modification-écriture et
/// la maintenance sous un seul verrouillage.
pub struct Constellation {
    satellites: Mutex<HashMap<String, SatelliteInfo>>,
}

impl Constellation {
    pub fn new() -> Self {
        Constellation {
            satellites: Mutex::new(HashMap::new()),
        }
    }

    /// Lecture-modification-écriture d'un satellite, puis maintenance
    ///
    /// Crée l'enregistrement à la première mention, date la poursuite,
    /// applique `f`, puis vieillit la carte entière et retourne les
    /// compteurs agrégés. Tout se passe sous le mutex constellation ;
    /// l'appelant ne doit détenir aucun autre verrou.
    pub fn update<F>(&self, sv: u16, now: Duration, f: F) -> ConstellationCounts
    where
        F: FnOnce(&mut SatelliteInfo),
    {
        let (family, sat_id, nmea_id) = designate(sv);
        let mut satellites = self.satellites.lock().unwrap();

        let entry = satellites
            .entry(sat_id.clone())
            .or_insert_with(|| SatelliteInfo {
                nmea_id,
                sat_id,
                elevation: -999,
                azimuth: -999,
                signal: i8::MIN,
                family,
                in_solution: false,
                time_last_solution: Duration::ZERO,
                time_last_seen: Duration::ZERO,
                time_last_tracked: Duration::ZERO,
            });
        entry.time_last_tracked = now;
        f(entry);

        Self::age_and_count(&mut satellites, now)
    }

    /// Maintenance seule : vieillissement et recomptage
    pub fn maintain(&self, now: Duration) -> ConstellationCounts {
        let mut satellites = self.satellites.lock().unwrap();
        Self::age_and_count(&mut satellites, now)
    }

    fn age_and_count(
        satellites: &mut HashMap<String, SatelliteInfo>,
        now: Duration,
    ) -> ConstellationCounts {
        let mut counts = ConstellationCounts::default();

        satellites.retain(|_, sat| {
            if now.saturating_sub(sat.time_last_tracked) > TRACK_EXPIRY {
                return false;
            }
            counts.tracked += 1;
            if sat.signal > 0 {
                counts.seen += 1;
            }
            if now.saturating_sub(sat.time_last_solution) > SOLUTION_EXPIRY {
                sat.in_solution = false;
            }
            if sat.in_solution {
                counts.in_solution += 1;
            }
            true
        });

        counts
    }

    /// Copie de l'enregistrement d'un satellite, s'il existe
    #[allow(dead_code)]
    pub fn get(&self, sat_id: &str) -> Option<SatelliteInfo> {
        self.satellites.lock().unwrap().get(sat_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.satellites.lock().unwrap().len()
    }
}

impl Default for Constellation {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_designate_gps() {
        let (family, id, nmea) = designate(2);
        assert_eq!(family, SatFamily::Gps);
        assert_eq!(id, "G2");
        assert_eq!(nmea, 2);
    }

    #[test]
    fn test_designate_sbas_nmea_range() {
        // NMEA 51 == PRN 138 (WAAS)
        let (family, id, nmea) = designate(51);
        assert_eq!(family, SatFamily::Sbas);
        assert_eq!(id, "S138");
        assert_eq!(nmea, 51);
    }

    #[test]
    fn test_designate_sbas_prn_range() {
        // PUBX,03 émet directement le PRN
        let (family, id, nmea) = designate(138);
        assert_eq!(family, SatFamily::Sbas);
        assert_eq!(id, "S138");
        assert_eq!(nmea, 51);
    }

    #[test]
    fn test_designate_glonass() {
        let (family, id, nmea) = designate(70);
        assert_eq!(family, SatFamily::Glonass);
        assert_eq!(id, "R6");
        assert_eq!(nmea, 70);
    }

    #[test]
    fn test_designate_unknown_gap() {
        let (family, id, _) = designate(100);
        assert_eq!(family, SatFamily::Unknown);
        assert_eq!(id, "U100");
    }

    #[test]
    fn test_update_creates_then_updates() {
        let constellation = Constellation::new();
        let now = Duration::from_secs(1);

        let counts = constellation.update(5, now, |sat| {
            sat.signal = 38;
            sat.time_last_seen = now;
        });
        assert_eq!(counts.tracked, 1);
        assert_eq!(counts.seen, 1);
        assert_eq!(counts.in_solution, 0);

        let sat = constellation.get("G5").unwrap();
        assert_eq!(sat.nmea_id, 5);
        assert_eq!(sat.elevation, -999);
        assert_eq!(sat.time_last_tracked, now);
    }

    #[test]
    fn test_solution_expiry_keeps_satellite() {
        let constellation = Constellation::new();
        let t0 = Duration::from_secs(1);

        constellation.update(5, t0, |sat| {
            sat.in_solution = true;
            sat.time_last_solution = t0;
            sat.signal = 40;
            sat.time_last_seen = t0;
        });

        // 6 s plus tard : plus en solution, mais toujours présent
        let counts = constellation.maintain(t0 + Duration::from_secs(6));
        assert_eq!(counts.in_solution, 0);
        assert_eq!(counts.tracked, 1);
        let sat = constellation.get("G5").unwrap();
        assert!(!sat.in_solution);
    }

    #[test]
    fn test_track_expiry_removes_satellite() {
        let constellation = Constellation::new();
        let t0 = Duration::from_secs(1);

        constellation.update(5, t0, |sat| {
            sat.in_solution = true;
            sat.time_last_solution = t0;
        });

        // 11 s de silence : l'enregistrement disparaît
        let counts = constellation.maintain(t0 + Duration::from_secs(11));
        assert_eq!(counts.tracked, 0);
        assert!(constellation.get("G5").is_none());
        assert_eq!(constellation.len(), 0);
    }

    #[test]
    fn test_counts_follow_in_solution_entries() {
        let constellation = Constellation::new();
        let now = Duration::from_secs(2);

        for sv in [1u16, 2, 3] {
            constellation.update(sv, now, |sat| {
                sat.in_solution = true;
                sat.time_last_solution = now;
                sat.signal = 30;
                sat.time_last_seen = now;
            });
        }
        constellation.update(4, now, |sat| {
            sat.signal = -99;
        });

        let counts = constellation.maintain(now);
        assert_eq!(counts.in_solution, 3);
        assert_eq!(counts.tracked, 4);
        assert_eq!(counts.seen, 3);
    }
}
