use crate::situation::AttitudeSituation;
use tracing::debug;

/// Canaux de sortie du collaborateur transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Trame attitude binaire de type GDL90
    AhrsGdl90,
    /// Rapport texte attitude pour simulateur EFB (débogage)
    AhrsFfSim,
}

/// Couche datagramme externe : encapsulation et émission
///
/// Le cœur construit les trames ; leur mise sur le fil (framing, CRC,
/// diffusion) appartient au collaborateur.
pub trait Transport: Send + Sync {
    fn prepare_message(&self, msg: &[u8]) -> Vec<u8>;
    fn send_msg(&self, msg: Vec<u8>, channel: Channel, retry: bool);
}

/// Transport par défaut : trace les trames sans les émettre
pub struct LogTransport;

impl Transport for LogTransport {
    fn prepare_message(&self, msg: &[u8]) -> Vec<u8> {
        msg.to_vec()
    }

    fn send_msg(&self, msg: Vec<u8>, channel: Channel, _retry: bool) {
        debug!("transport {:?}: {} bytes", channel, msg.len());
    }
}

/// Construit la trame attitude fixe de 16 octets, champs 16 bits grand-boutiens
///
/// | 0..3  | magie 0x4C 0x45 0x01 0x00       |
/// | 4..5  | roulis × 10, signé              |
/// | 6..7  | tangage × 10, signé             |
/// | 8..9  | cap × 10, non signé             |
/// | 10..11| dérapage × 10 (constant 0)      |
/// | 12..13| taux de lacet × 10 (constant 0) |
/// | 14..15| facteur de charge × 10 (1.0 g)  |
pub fn make_ahrs_gdl90_frame(attitude: &AttitudeSituation) -> [u8; 16] {
    let mut msg = [0u8; 16];
    msg[0] = 0x4C;
    msg[1] = 0x45;
    msg[2] = 0x01;
    msg[3] = 0x00;

    let roll = (attitude.roll * 10.0) as i16;
    let pitch = (attitude.pitch * 10.0) as i16;
    let heading = (attitude.gyro_heading * 10.0) as u16;
    let slip_skid = 0i16;
    let yaw_rate = 0i16;
    let load_factor = 10i16;

    msg[4..6].copy_from_slice(&roll.to_be_bytes());
    msg[6..8].copy_from_slice(&pitch.to_be_bytes());
    msg[8..10].copy_from_slice(&heading.to_be_bytes());
    msg[10..12].copy_from_slice(&slip_skid.to_be_bytes());
    msg[12..14].copy_from_slice(&yaw_rate.to_be_bytes());
    msg[14..16].copy_from_slice(&load_factor.to_be_bytes());

    msg
}

/// Rapport attitude texte `XATTHorizon,<cap>,<tangage>,<roulis>`
pub fn make_ff_sim_report(attitude: &AttitudeSituation) -> Vec<u8> {
    format!(
        "XATTHorizon,{:.6},{:.6},{:.6}",
        attitude.gyro_heading, attitude.pitch, attitude.roll
    )
    .into_bytes()
}

/// Faux transport pour les tests : mémorise chaque émission
#[cfg(test)]
pub struct RecordingTransport {
    pub sent: std::sync::Mutex<Vec<(Vec<u8>, Channel)>>,
}

#[cfg(test)]
impl RecordingTransport {
    pub fn new() -> Self {
        RecordingTransport {
            sent: std::sync::Mutex::new(Vec::new()),
        }
    }
}

#[cfg(test)]
impl Transport for RecordingTransport {
    fn prepare_message(&self, msg: &[u8]) -> Vec<u8> {
        msg.to_vec()
    }

    fn send_msg(&self, msg: Vec<u8>, channel: Channel, _retry: bool) {
        self.sent.lock().unwrap().push((msg, channel));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_magic_and_length() {
        let frame = make_ahrs_gdl90_frame(&AttitudeSituation::default());
        assert_eq!(frame.len(), 16);
        assert_eq!(&frame[..4], &[0x4C, 0x45, 0x01, 0x00]);
    }

    #[test]
    fn test_frame_encodes_attitude_times_ten() {
        let attitude = AttitudeSituation {
            pitch: 5.5,
            roll: -12.5,
            gyro_heading: 271.5,
            ..Default::default()
        };
        let frame = make_ahrs_gdl90_frame(&attitude);

        assert_eq!(i16::from_be_bytes([frame[4], frame[5]]), -125);
        assert_eq!(i16::from_be_bytes([frame[6], frame[7]]), 55);
        assert_eq!(u16::from_be_bytes([frame[8], frame[9]]), 2715);
    }

    #[test]
    fn test_frame_constant_fields() {
        let frame = make_ahrs_gdl90_frame(&AttitudeSituation::default());
        // dérapage et taux de lacet à 0, facteur de charge à 1.0 g
        assert_eq!(i16::from_be_bytes([frame[10], frame[11]]), 0);
        assert_eq!(i16::from_be_bytes([frame[12], frame[13]]), 0);
        assert_eq!(i16::from_be_bytes([frame[14], frame[15]]), 10);
    }

    #[test]
    fn test_ff_sim_report_text() {
        let attitude = AttitudeSituation {
            pitch: 1.0,
            roll: -2.0,
            gyro_heading: 90.0,
            ..Default::default()
        };
        let report = make_ff_sim_report(&attitude);
        let text = std::str::from_utf8(&report).unwrap();
        assert!(text.starts_with("XATTHorizon,90.000000,1.000000,-2.000000"));
    }
}
