/*!
Décodage des trames NMEA-0183 vers la situation.

Trames standard : GGA VTG RMC GSA GSV. Propriétaires u-blox : PUBX,00
PUBX,03 PUBX,04. Chaque décodeur travaille sur une copie de
l'enregistrement GPS et ne publie qu'en cas de succès complet : une
trame rejetée ne laisse jamais de champ à moitié écrit.
*/

use crate::clock::ClockSource;
use crate::nmea;
use crate::satellites::{designate, Constellation, ConstellationCounts, SatFamily};
use crate::situation::{GpsSituation, Settings, Situation};
use crate::timesync::{self, TimeSetter};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

const METERS_TO_FEET: f32 = 3.28084;
const KMH_TO_KNOTS: f64 = 0.540003;

/// Collaborateur d'enregistrement des situations (journal de vol)
pub trait SituationLog: Send + Sync {
    /// Consigne l'état GPS courant (après chaque trame acceptée)
    fn log_situation(&self, gps: &GpsSituation);

    /// Aligne l'horodatage du journal sur l'heure GPS
    fn set_log_time_with_gps(&self, gps: &GpsSituation);
}

/// Journal nul : le démon tourne sans enregistreur branché
#[allow(dead_code)]
pub struct NullSituationLog;

impl SituationLog for NullSituationLog {
    fn log_situation(&self, _gps: &GpsSituation) {}
    fn set_log_time_with_gps(&self, _gps: &GpsSituation) {}
}

/// Journal par traces : une ligne de debug par situation consignée
pub struct TracingSituationLog;

impl SituationLog for TracingSituationLog {
    fn log_situation(&self, gps: &GpsSituation) {
        debug!(
            "situation: q={} lat={:.5} lng={:.5} alt={:.0}ft hae={:.0}ft geoid={:.0}ft acc={:.1}m accv={:.1}m nacp={} sats={}/{}/{} gs={}kt tc={:.1} vv={:.2}ft/s fix_utc={:.1}s",
            gps.quality,
            gps.lat,
            gps.lng,
            gps.alt,
            gps.height_above_ellipsoid,
            gps.geoid_sep,
            gps.accuracy,
            gps.accuracy_vert,
            gps.nacp,
            gps.satellites,
            gps.satellites_tracked,
            gps.satellites_seen,
            gps.ground_speed,
            gps.true_course,
            gps.gps_vert_vel,
            gps.last_fix_since_midnight_utc,
        );
    }

    fn set_log_time_with_gps(&self, gps: &GpsSituation) {
        if let Some(gps_time) = gps.gps_time {
            debug!("data log clock aligned on GPS time {}", gps_time);
        }
    }
}

/// Catégorie d'intégrité NACp déduite de la confiance horizontale 95 %
///
/// Une valeur exactement sur une borne tombe dans la classe inférieure.
pub fn calculate_nacp(accuracy: f32) -> u8 {
    if accuracy < 3.0 {
        11
    } else if accuracy < 10.0 {
        10
    } else if accuracy < 30.0 {
        9
    } else if accuracy < 92.6 {
        8
    } else if accuracy < 185.2 {
        7
    } else if accuracy < 555.6 {
        6
    } else {
        0
    }
}

/// Heure NMEA `HHMMSS[.sss]` décomposée, plus secondes depuis minuit
fn parse_hhmmss(s: &str) -> Option<(u32, u32, f64)> {
    let hr: u32 = s.get(0..2)?.parse().ok()?;
    let min: u32 = s.get(2..4)?.parse().ok()?;
    let sec: f64 = s.get(4..)?.parse().ok()?;
    Some((hr, min, sec))
}

fn seconds_since_midnight(hr: u32, min: u32, sec: f64) -> f32 {
    (3600 * hr + 60 * min) as f32 + sec as f32
}

/// Latitude NMEA `DDMM.mmmm` + hémisphère N/S, en degrés décimaux signés
fn parse_latitude(value: &str, hemisphere: &str) -> Option<f32> {
    let deg: u32 = value.get(0..2)?.parse().ok()?;
    let minutes: f64 = value.get(2..)?.parse().ok()?;
    let mut lat = deg as f64 + minutes / 60.0;
    if hemisphere == "S" {
        lat = -lat;
    }
    Some(lat as f32)
}

/// Longitude NMEA `DDDMM.mmmm` + hémisphère E/W
fn parse_longitude(value: &str, hemisphere: &str) -> Option<f32> {
    let deg: u32 = value.get(0..3)?.parse().ok()?;
    let minutes: f64 = value.get(3..)?.parse().ok()?;
    let mut lng = deg as f64 + minutes / 60.0;
    if hemisphere == "W" {
        lng = -lng;
    }
    Some(lng as f32)
}

/// Date `DDMMYY` + heure décomposée vers un horodatage UTC complet
fn parse_gps_datetime(date: &str, hr: u32, min: u32, sec: f64) -> Option<DateTime<Utc>> {
    let text = format!("{} {:02}:{:02}:{:06.3}", date, hr, min, sec);
    NaiveDateTime::parse_from_str(&text, "%d%m%y %H:%M:%S%.3f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Parseur de trames : l'unique écrivain de l'enregistrement GPS
pub struct SentenceParser {
    situation: Arc<Situation>,
    constellation: Arc<Constellation>,
    clock: Arc<dyn ClockSource>,
    time_setter: Arc<dyn TimeSetter>,
    datalog: Arc<dyn SituationLog>,
    settings: Arc<Settings>,
}

impl SentenceParser {
    pub fn new(
        situation: Arc<Situation>,
        constellation: Arc<Constellation>,
        clock: Arc<dyn ClockSource>,
        time_setter: Arc<dyn TimeSetter>,
        datalog: Arc<dyn SituationLog>,
        settings: Arc<Settings>,
    ) -> Self {
        SentenceParser {
            situation,
            constellation,
            clock,
            time_setter,
            datalog,
            settings,
        }
    }

    /// Traite une ligne NMEA ; vrai si la trame a été acceptée
    ///
    /// La vivacité (`last_valid_nmea_message_*`) avance dès que le
    /// checksum est bon, avant la distribution : `is_gps_connected`
    /// dépend de n'importe quelle trame valide, pas de son acceptation.
    pub fn process_line(&self, line: &str) -> bool {
        let payload = match nmea::validate_checksum(line.trim_end()) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("GPS error. Invalid NMEA string: {}", e);
                return false;
            }
        };

        let now = self.clock.monotonic();
        self.situation.with_gps(|gps| {
            gps.last_valid_nmea_message_time = now;
            gps.last_valid_nmea_message = line.to_string();
        });

        let x: Vec<&str> = payload.split(',').collect();
        let used = match x[0] {
            "PUBX" => match x.get(1) {
                Some(&"00") => self.decode_pubx00(&x),
                Some(&"03") => self.decode_pubx03(&x),
                Some(&"04") => self.decode_pubx04(&x),
                _ => false,
            },
            "GNVTG" | "GPVTG" => self.decode_vtg(&x),
            "GNGGA" | "GPGGA" => self.decode_gga(&x),
            "GNRMC" | "GPRMC" => self.decode_rmc(&x),
            "GNGSA" | "GPGSA" => self.decode_gsa(&x),
            "GPGSV" | "GLGSV" => self.decode_gsv(&x),
            _ => false,
        };

        if used || self.settings.debug() {
            self.datalog.log_situation(&self.situation.gps_snapshot());
        }
        if !used && self.settings.debug() {
            debug!("sentence not used -- {}", line);
        }
        used
    }

    /// PUBX,00 : fix de position complet
    fn decode_pubx00(&self, x: &[&str]) -> bool {
        if x.len() < 20 {
            return false;
        }
        let now = self.clock.monotonic();
        let mut scratch = self.situation.gps_snapshot();

        // Statut de navigation en premier : une position sans fix ne
        // doit jamais partir vers l'aval
        scratch.quality = match x[8] {
            "D2" | "D3" => 2,
            "G2" | "G3" => 1,
            "DR" | "RK" => 6,
            _ => return false, // NF ou inconnu
        };

        // Confiances : u-blox rapporte 1 sigma, on publie du 95 % (2 sigma)
        let Ok(h_acc) = x[9].parse::<f32>() else {
            return false;
        };
        scratch.accuracy = h_acc * 2.0;
        scratch.nacp = calculate_nacp(scratch.accuracy);

        let Ok(v_acc) = x[10].parse::<f32>() else {
            return false;
        };
        scratch.accuracy_vert = v_acc * 2.0;

        if x[2].len() < 8 {
            return false;
        }
        let Some((hr, min, sec)) = parse_hhmmss(x[2]) else {
            return false;
        };
        scratch.last_fix_since_midnight_utc = seconds_since_midnight(hr, min, sec);

        if x[3].len() < 10 {
            return false;
        }
        let Some(lat) = parse_latitude(x[3], x[4]) else {
            return false;
        };
        scratch.lat = lat;

        if x[5].len() < 11 {
            return false;
        }
        let Some(lng) = parse_longitude(x[5], x[6]) else {
            return false;
        };
        scratch.lng = lng;

        // Hauteur ellipsoïdale en mètres ; l'altitude MSL s'obtient en
        // retranchant la séparation du géoïde portée par la dernière GGA
        let Ok(hae) = x[7].parse::<f32>() else {
            return false;
        };
        scratch.height_above_ellipsoid = hae * METERS_TO_FEET;
        scratch.alt = hae * METERS_TO_FEET - scratch.geoid_sep;
        scratch.last_fix_local_time = now;

        let Ok(groundspeed_kmh) = x[11].parse::<f64>() else {
            return false;
        };
        let groundspeed = groundspeed_kmh * KMH_TO_KNOTS;
        scratch.ground_speed = groundspeed as u16;

        let Ok(true_course) = x[12].parse::<f32>() else {
            return false;
        };
        if groundspeed > 3.0 {
            // Mouvement négligeable sinon : le cap GPS ne veut rien dire
            // à l'arrêt, on garde le dernier connu
            scratch.true_course = true_course;
        }
        scratch.last_ground_track_time = now;

        let Ok(vert_vel) = x[13].parse::<f32>() else {
            return false;
        };
        scratch.gps_vert_vel = vert_vel * -METERS_TO_FEET; // positif vers le haut

        let Ok(satellites) = x[18].parse::<u16>() else {
            return false;
        };
        scratch.satellites = satellites;

        self.situation.commit_gps(scratch);
        true
    }

    /// PUBX,03 : état de poursuite de chaque satellite
    fn decode_pubx03(&self, x: &[&str]) -> bool {
        if x.len() < 3 {
            return false;
        }
        let Ok(sat_tracked) = x[2].parse::<usize>() else {
            return false;
        };

        let expected_len = sat_tracked.saturating_mul(6).saturating_add(3);
        if self.settings.debug() {
            debug!(
                "PUBX,03 message with {} satellites is {} fields long. (Should be {} fields long)",
                sat_tracked,
                x.len(),
                expected_len
            );
        }
        if x.len() < expected_len {
            if self.settings.debug() {
                debug!("PUBX,03 message is missing fields");
            }
            return false;
        }

        let now = self.clock.monotonic();
        let dbg = self.settings.debug();
        let mut counts: Option<ConstellationCounts> = None;

        for i in 0..sat_tracked {
            let base = 3 + 6 * i;
            let Ok(sv) = x[base].parse::<u16>() else {
                return false;
            };
            let status = x[base + 1];
            let azimuth: i16 = x[base + 2].parse().unwrap_or(-999);
            let elevation: i16 = x[base + 3].parse().unwrap_or(-999);
            let cno: Result<i32, _> = x[base + 4].parse();

            counts = Some(self.constellation.update(sv, now, |sat| {
                sat.elevation = elevation;
                sat.azimuth = azimuth;
                match cno {
                    // Champ vide tant que le satellite n'est pas reçu
                    Err(_) => sat.signal = -99,
                    Ok(signal) => {
                        if signal > 0 {
                            sat.time_last_seen = now;
                        }
                        sat.signal = signal as i8;
                    }
                }
                // Statut [ U | e | - ] : utilisé dans la solution,
                // éphémérides seules, ou non utilisé
                if status == "U" {
                    sat.in_solution = true;
                    sat.time_last_solution = now;
                } else {
                    sat.in_solution = false;
                }

                if dbg {
                    let marker = if sat.in_solution { "+" } else { " " };
                    debug!(
                        "UBX: satellite {}{} at index {}. Type = {:?}, NMEA-ID = {}, Elev = {}, Azimuth = {}, Cno = {}",
                        marker, sat.sat_id, i, sat.family, sat.nmea_id, sat.elevation, sat.azimuth, sat.signal
                    );
                }
            }));
        }

        self.situation.with_gps(|gps| {
            gps.satellites_tracked = sat_tracked as u16;
            if let Some(c) = counts {
                gps.satellites = c.in_solution;
                gps.satellites_tracked = c.tracked;
                gps.satellites_seen = c.seen;
            }
        });
        true
    }

    /// PUBX,04 : heure et date GPS
    fn decode_pubx04(&self, x: &[&str]) -> bool {
        if x.len() < 6 {
            return false;
        }

        // Semaine GPS : un récepteur pas encore initialisé émet l'époque
        // 1980, qu'il ne faut surtout pas écrire dans l'horloge système
        let Ok(utc_week) = x[5].parse::<i32>() else {
            return false;
        };
        if !(1877..32767).contains(&utc_week) {
            warn!(
                "GPS week # {} out of scope; not setting time and date",
                utc_week
            );
            return false;
        }

        let Some((hr, min, sec)) = parse_hhmmss(x[2]) else {
            return false;
        };
        if x[3].len() != 6 {
            return false;
        }
        let Some(gps_time) = parse_gps_datetime(x[3], hr, min, sec) else {
            return false;
        };

        let now = self.clock.monotonic();
        self.situation.with_gps(|gps| {
            gps.last_gps_time_time = now;
            gps.gps_time = Some(gps_time);
            gps.last_fix_since_midnight_utc = seconds_since_midnight(hr, min, sec);
        });

        timesync::sync_system_time(&*self.clock, &*self.time_setter, gps_time);
        self.datalog
            .set_log_time_with_gps(&self.situation.gps_snapshot());
        true
    }

    /// GGA : fix de position standard, porteur de la séparation du géoïde
    fn decode_gga(&self, x: &[&str]) -> bool {
        if x.len() < 15 {
            return false;
        }
        let now = self.clock.monotonic();
        let mut scratch = self.situation.gps_snapshot();

        let Ok(quality) = x[6].parse::<u8>() else {
            return false;
        };
        scratch.quality = quality;

        let Some((hr, min, sec)) = parse_hhmmss(x[1]) else {
            return false;
        };
        scratch.last_fix_since_midnight_utc = seconds_since_midnight(hr, min, sec);

        if x[2].len() < 4 {
            return false;
        }
        let Some(lat) = parse_latitude(x[2], x[3]) else {
            return false;
        };
        scratch.lat = lat;

        if x[4].len() < 5 {
            return false;
        }
        let Some(lng) = parse_longitude(x[4], x[5]) else {
            return false;
        };
        scratch.lng = lng;

        let Ok(alt) = x[9].parse::<f32>() else {
            return false;
        };
        scratch.alt = alt * METERS_TO_FEET;

        // Sep = HAE - MSL, indispensable aux altitudes PUBX,00
        let Ok(geoid_sep) = x[11].parse::<f32>() else {
            return false;
        };
        scratch.geoid_sep = geoid_sep * METERS_TO_FEET;
        scratch.height_above_ellipsoid = scratch.geoid_sep + scratch.alt;

        scratch.last_fix_local_time = now;
        self.situation.commit_gps(scratch);
        true
    }

    /// VTG : route et vitesse sol
    fn decode_vtg(&self, x: &[&str]) -> bool {
        // 9 champs minimum pour tolérer les équipements antérieurs à
        // NMEA 2.3 qui omettent l'indicateur de mode
        if x.len() < 9 {
            return false;
        }
        let now = self.clock.monotonic();
        let mut scratch = self.situation.gps_snapshot();

        let Ok(groundspeed) = x[5].parse::<f64>() else {
            return false;
        };
        scratch.ground_speed = groundspeed as u16;

        let Ok(true_course) = x[1].parse::<f32>() else {
            return false;
        };
        if groundspeed > 3.0 {
            scratch.true_course = true_course;
        }
        scratch.last_ground_track_time = now;

        self.situation.commit_gps(scratch);
        true
    }

    /// RMC : minimum recommandé, porteur de la date complète
    fn decode_rmc(&self, x: &[&str]) -> bool {
        if x.len() < 11 {
            return false;
        }
        if x[2] != "A" {
            return false; // V = fix invalide
        }
        let now = self.clock.monotonic();
        let mut scratch = self.situation.gps_snapshot();

        let Some((hr, min, sec)) = parse_hhmmss(x[1]) else {
            return false;
        };
        scratch.last_fix_since_midnight_utc = seconds_since_midnight(hr, min, sec);

        if x[9].len() == 6 {
            if let Some(gps_time) = parse_gps_datetime(x[9], hr, min, sec) {
                scratch.last_gps_time_time = now;
                scratch.gps_time = Some(gps_time);
                timesync::sync_system_time(&*self.clock, &*self.time_setter, gps_time);
            }
        }

        if x[3].len() < 4 {
            return false;
        }
        let Some(lat) = parse_latitude(x[3], x[4]) else {
            return false;
        };
        scratch.lat = lat;

        if x[5].len() < 5 {
            return false;
        }
        let Some(lng) = parse_longitude(x[5], x[6]) else {
            return false;
        };
        scratch.lng = lng;

        scratch.last_fix_local_time = now;

        let Ok(groundspeed) = x[7].parse::<f64>() else {
            return false;
        };
        scratch.ground_speed = groundspeed as u16;

        let Ok(true_course) = x[8].parse::<f32>() else {
            return false;
        };
        if groundspeed > 3.0 {
            scratch.true_course = true_course;
        }
        scratch.last_ground_track_time = now;

        self.situation.commit_gps(scratch);
        self.datalog
            .set_log_time_with_gps(&self.situation.gps_snapshot());
        true
    }

    /// GSA : satellites actifs et dilutions de précision
    fn decode_gsa(&self, x: &[&str]) -> bool {
        if x.len() < 18 {
            return false;
        }

        // Champ 2 : type de solution. 1 = aucune ; le statut WAAS vient
        // de GGA, inutile de le chercher ici
        if x[2].is_empty() || x[2] == "1" {
            return false;
        }

        let now = self.clock.monotonic();
        let mut scratch = self.situation.gps_snapshot();

        let mut sat_count: u16 = 0;
        let mut has_sbas = false;
        let mut counts: Option<ConstellationCounts> = None;

        for sv_text in &x[3..15] {
            let Ok(sv) = sv_text.parse::<u16>() else {
                continue; // champ vide : moins de 12 satellites actifs
            };
            sat_count += 1;
            let (family, _, _) = designate(sv);
            if family == SatFamily::Sbas {
                has_sbas = true;
            }

            counts = Some(self.constellation.update(sv, now, |sat| {
                // Participer à la solution implique signal et poursuite
                sat.in_solution = true;
                sat.time_last_solution = now;
                sat.time_last_seen = now;
            }));
        }

        if let Some(c) = counts {
            scratch.satellites = c.in_solution;
            scratch.satellites_tracked = c.tracked;
            scratch.satellites_seen = c.seen;
        }

        // GSA plafonne à 12 satellites : ne pas écraser un décompte plus
        // riche issu de PUBX,03. En solution différentielle sans
        // satellite SBAS listé, le satellite de correction est compté à
        // la main puisqu'il n'entre pas dans la charge utile GSA.
        if sat_count <= 12 && scratch.satellites_tracked <= 13 {
            scratch.satellites = sat_count;
            if scratch.quality == 2 && !has_sbas {
                scratch.satellites += 1;
            }
        }

        let Ok(hdop) = x[16].parse::<f32>() else {
            return false;
        };
        scratch.accuracy = if scratch.quality == 2 {
            hdop * 4.0 // estimation 95 % pour une solution WAAS/DGPS
        } else {
            hdop * 8.0 // estimation 95 % pour une solution 3D seule
        };
        scratch.nacp = calculate_nacp(scratch.accuracy);

        let Ok(vdop) = x[17].parse::<f32>() else {
            return false;
        };
        scratch.accuracy_vert = vdop * 5.0;

        self.situation.commit_gps(scratch);
        true
    }

    /// GSV : satellites en vue (GPS + SBAS, ou GLONASS)
    fn decode_gsv(&self, x: &[&str]) -> bool {
        if x.len() < 4 {
            return false;
        }

        // L'index de message sert uniquement au journal : les séquences
        // multi-messages ne sont pas dédupliquées, chaque trame est
        // acceptée indépendamment
        let Ok(msg_index) = x[2].parse::<u32>() else {
            return false;
        };

        let sats_this_msg = (x.len() - 4) / 4;
        if self.settings.debug() {
            debug!(
                "{} message [{}] is {} fields long and describes {} satellites",
                x[0],
                msg_index,
                x.len(),
                sats_this_msg
            );
        }

        let quality = self.situation.gps_snapshot().quality;
        let now = self.clock.monotonic();
        let dbg = self.settings.debug();
        let mut counts: Option<ConstellationCounts> = None;

        for i in 0..sats_this_msg {
            let base = 4 + 4 * i;
            let Ok(sv) = x[base].parse::<u16>() else {
                return false;
            };
            let elevation: i16 = x[base + 1].parse().unwrap_or(-999);
            let azimuth: i16 = x[base + 2].parse().unwrap_or(-999);
            let cno: Result<i32, _> = x[base + 3].parse();

            counts = Some(self.constellation.update(sv, now, |sat| {
                sat.elevation = elevation;
                sat.azimuth = azimuth;
                match cno {
                    Err(_) => {
                        // Signal absent : GSA/GSV n'ont pas de marqueur
                        // "sorti de solution" explicite, on le déduit ici
                        sat.signal = -99;
                        sat.in_solution = false;
                    }
                    Ok(mut signal) => {
                        if signal > 0 {
                            sat.time_last_seen = now;
                        }
                        if signal > 127 {
                            signal = 127;
                        }
                        sat.signal = signal as i8;
                    }
                }

                // GSA plafonne à 12 satellites : un SBAS qui contribue à
                // une solution différentielle peut lui être invisible.
                // Signal fort + solution DGPS => considéré en solution.
                if sat.family == SatFamily::Sbas {
                    if quality == 2 {
                        if sat.signal > 16 {
                            sat.in_solution = true;
                            sat.time_last_solution = now;
                        }
                    } else {
                        sat.in_solution = false;
                    }
                }

                if dbg {
                    let marker = if sat.in_solution { "+" } else { " " };
                    debug!(
                        "GSV: satellite {}{} at index {}. Type = {:?}, NMEA-ID = {}, Elev = {}, Azimuth = {}, Cno = {}",
                        marker, sat.sat_id, i, sat.family, sat.nmea_id, sat.elevation, sat.azimuth, sat.signal
                    );
                }
            }));
        }

        if let Some(c) = counts {
            self.situation.with_gps(|gps| {
                gps.satellites = c.in_solution;
                gps.satellites_tracked = c.tracked;
                gps.satellites_seen = c.seen;
            });
        }
        true
    }
}
