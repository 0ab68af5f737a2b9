/*!
Découverte et configuration du récepteur GPS série.

Les nœuds candidats sont sondés dans un ordre fixe ; le premier présent
gagne. Deux flots de configuration selon la famille du récepteur
(u-blox en binaire UBX, SiRF-IV en commandes NMEA), puis réouverture à
la vitesse d'exploitation. Les écritures de configuration sont au fil
de l'eau : aucun acquittement n'est attendu, l'échec se manifeste par
l'absence de trames et le superviseur ressondera.
*/

use crate::nmea::{make_nmea_cmd, make_ubx_cfg};
use serialport::SerialPort;
use std::io::Write;
use std::path::Path;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Vitesse d'exploitation après configuration
const OPERATING_BAUD: u32 = 38400;

/// Le lecteur ne doit jamais bloquer indéfiniment sur un périphérique
/// débranché : à 5 Hz, 2,5 s de silence signifie déconnexion
const READ_TIMEOUT: Duration = Duration::from_millis(2500);

/// Temps laissé au récepteur pour appliquer sa nouvelle configuration
const REOPEN_DELAY: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum DeviceError {
    /// Aucun nœud candidat présent ; le superviseur retentera dans 4 s
    #[error("no suitable GPS device found")]
    NoDevice,

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

/// Chemins sondés dans l'ordre, si la configuration n'en impose pas
pub fn default_device_paths() -> Vec<String> {
    vec![
        "/dev/vk172".to_string(),     // u-blox 7
        "/dev/vk162".to_string(),     // u-blox 6
        "/dev/prolific0".to_string(), // BU-353-S4 SiRF-IV
        "/dev/ttyAMA0".to_string(),   // UART PL011 (broches 8 et 10 du RPi)
    ]
}

/// Un périphérique "prolific" est un pont USB-série de BU-353-S4 : SiRF-IV
fn is_sirf(device: &str) -> bool {
    device.contains("prolific")
}

fn initial_baud(device: &str) -> u32 {
    if is_sirf(device) {
        4800
    } else {
        9600
    }
}

/// Commandes d'initialisation SiRF-IV, une fois la vitesse commutée :
/// cadence 6, puis GGA/GSA/RMC/VTG à chaque fix et GSV un fix sur cinq
fn sirf_init_cmds() -> Vec<Vec<u8>> {
    vec![
        make_nmea_cmd("PSRF103,00,6,00,0"),
        make_nmea_cmd("PSRF103,00,00,01,01"),
        make_nmea_cmd("PSRF103,02,00,01,01"),
        make_nmea_cmd("PSRF103,04,00,01,01"),
        make_nmea_cmd("PSRF103,05,00,01,01"),
        make_nmea_cmd("PSRF103,03,00,05,01"),
    ]
}

/// Trames de configuration u-blox, dans l'ordre d'émission
fn ublox_config_frames() -> Vec<Vec<u8>> {
    let mut frames = Vec::new();

    // CFG-RATE : mesure toutes les 200 ms (5 Hz), alignée temps GPS
    frames.push(make_ubx_cfg(
        0x06,
        0x08,
        &[0xC8, 0x00, 0x01, 0x00, 0x01, 0x00],
    ));

    // CFG-NAV5 : masque dyn+fixMode, modèle dynamique 7 ("airborne <2g"),
    // fix 3D uniquement
    let mut nav5 = [0u8; 36];
    nav5[0] = 0x05;
    nav5[2] = 0x07;
    nav5[3] = 0x02;
    frames.push(make_ubx_cfg(0x06, 0x24, &nav5));

    // CFG-GNSS : GPS 8-16 canaux, SBAS 2-3, BeiDou et QZSS coupés,
    // GLONASS 8-14 canaux. Cadence max 5 Hz avec GPS+GLONASS.
    let mut gnss = vec![0x00, 0x20, 0x20, 0x05];
    gnss.extend_from_slice(&[0x00, 0x08, 0x10, 0x00, 0x01, 0x00, 0x01, 0x01]); // GPS
    gnss.extend_from_slice(&[0x01, 0x02, 0x03, 0x00, 0x01, 0x00, 0x01, 0x01]); // SBAS
    gnss.extend_from_slice(&[0x03, 0x00, 0x10, 0x00, 0x00, 0x00, 0x01, 0x01]); // BeiDou
    gnss.extend_from_slice(&[0x05, 0x00, 0x03, 0x00, 0x00, 0x00, 0x01, 0x01]); // QZSS
    gnss.extend_from_slice(&[0x06, 0x08, 0x0E, 0x00, 0x01, 0x00, 0x01, 0x01]); // GLONASS
    frames.push(make_ubx_cfg(0x06, 0x3E, &gnss));

    // CFG-SBAS : mode activé, usage ranging+correction+integrity
    frames.push(make_ubx_cfg(
        0x06,
        0x16,
        &[0x01, 0x07, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00],
    ));

    // CFG-MSG : PUBX,00 à chaque fix, PUBX,03 un fix sur cinq, PUBX,04 un
    // sur dix, GGA un sur cinq, toutes les autres trames NMEA coupées.
    //                      DDC   UART1 UART2 USB   I2C   Res
    let msg_rates: [[u8; 8]; 17] = [
        [0xF0, 0x00, 0x00, 0x05, 0x00, 0x05, 0x00, 0x01], // GGA
        [0xF0, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01], // GLL
        [0xF0, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01], // GSA
        [0xF0, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01], // GSV
        [0xF0, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01], // RMC
        [0xF0, 0x05, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01], // VTG
        [0xF0, 0x06, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00], // GRS
        [0xF0, 0x07, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00], // GST
        [0xF0, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00], // ZDA
        [0xF0, 0x09, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00], // GBS
        [0xF0, 0x0A, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00], // DTM
        [0xF0, 0x0D, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00], // GNS
        [0xF0, 0x0E, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
        [0xF0, 0x0F, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00], // VLW
        [0xF1, 0x00, 0x01, 0x01, 0x01, 0x01, 0x01, 0x00], // PUBX,00
        [0xF1, 0x03, 0x05, 0x05, 0x05, 0x05, 0x05, 0x00], // PUBX,03
        [0xF1, 0x04, 0x0A, 0x0A, 0x0A, 0x0A, 0x0A, 0x00], // PUBX,04
    ];
    for rate in msg_rates {
        frames.push(make_ubx_cfg(0x06, 0x01, &rate));
    }

    // CFG-PRT : UART1 38400 bauds, 8N1, entrée UBX+NMEA, sortie NMEA
    // seule (plus d'UBX sur le fil après configuration)
    frames.push(make_ubx_cfg(0x06, 0x00, &uart1_port_config(OPERATING_BAUD)));

    frames
}

/// Charge utile CFG-PRT pour UART1, tout en petit-boutien
fn uart1_port_config(baud: u32) -> [u8; 20] {
    let mut cfg = [0u8; 20];
    cfg[0] = 0x01; // portID

    // Mode UART : 1 bit de stop, sans parité, 8 bits de données
    cfg[4] = 0xC0;
    cfg[5] = 0x08;

    cfg[8] = (baud & 0xFF) as u8;
    cfg[9] = ((baud >> 8) & 0xFF) as u8;
    cfg[10] = ((baud >> 16) & 0xFF) as u8;
    cfg[11] = ((baud >> 24) & 0xFF) as u8;

    cfg[12] = 0x03; // inProtoMask : NMEA et UBX
    cfg[14] = 0x02; // outProtoMask : NMEA

    cfg
}

fn open_port(device: &str, baud: u32) -> Result<Box<dyn SerialPort>, DeviceError> {
    Ok(serialport::new(device, baud)
        .timeout(READ_TIMEOUT)
        .open()?)
}

/// Écriture de configuration au fil de l'eau : l'erreur est tracée mais
/// jamais propagée, le récepteur n'acquitte de toute façon pas
fn write_cfg(port: &mut Box<dyn SerialPort>, frame: &[u8]) {
    if let Err(e) = port.write_all(frame) {
        debug!("GPS config write failed: {}", e);
    }
}

/// Sonde les nœuds candidats, configure le récepteur trouvé et retourne
/// le port ouvert à la vitesse d'exploitation
pub fn open_gps_serial(
    devices: &[String],
    debug_enabled: bool,
) -> Result<Box<dyn SerialPort>, DeviceError> {
    let device = devices
        .iter()
        .find(|d| Path::new(d.as_str()).exists())
        .ok_or(DeviceError::NoDevice)?;

    if debug_enabled {
        debug!("Using {} for GPS", device);
    }

    // Ouverture à la vitesse d'usine pour la configuration
    let mut port = open_port(device, initial_baud(device))?;

    if is_sirf(device) {
        info!("Using SiRF-IV config.");

        // Commuter le récepteur à 38400 bauds, puis le rejoindre
        write_cfg(&mut port, &make_nmea_cmd("PSRF100,1,38400,8,1,0"));
        drop(port);
        thread::sleep(REOPEN_DELAY);

        port = open_port(device, OPERATING_BAUD)?;
        for cmd in sirf_init_cmds() {
            write_cfg(&mut port, &cmd);
        }

        if debug_enabled {
            debug!(
                "Finished writing SiRF GPS config to {}. Opening port to test connection.",
                device
            );
        }
    } else {
        for frame in ublox_config_frames() {
            write_cfg(&mut port, &frame);
        }

        if debug_enabled {
            debug!(
                "Finished writing u-blox GPS config to {}. Opening port to test connection.",
                device
            );
        }
    }

    drop(port);
    thread::sleep(REOPEN_DELAY);

    // Réouverture à la vitesse fraîchement configurée ; le timeout de
    // lecture protège le lecteur d'un périphérique reconfiguré de
    // travers ou débranché
    open_port(device, OPERATING_BAUD)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_order_no_device() {
        let devices = vec![
            "/nonexistent/gps0".to_string(),
            "/nonexistent/gps1".to_string(),
        ];
        match open_gps_serial(&devices, false) {
            Err(DeviceError::NoDevice) => {}
            other => panic!("expected NoDevice, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_default_probe_order() {
        let devices = default_device_paths();
        assert_eq!(
            devices,
            ["/dev/vk172", "/dev/vk162", "/dev/prolific0", "/dev/ttyAMA0"]
        );
    }

    #[test]
    fn test_sirf_detection_and_baud() {
        assert!(is_sirf("/dev/prolific0"));
        assert!(!is_sirf("/dev/vk172"));
        assert_eq!(initial_baud("/dev/prolific0"), 4800);
        assert_eq!(initial_baud("/dev/ttyAMA0"), 9600);
    }

    #[test]
    fn test_sirf_cmds_are_framed_nmea() {
        let cmds = sirf_init_cmds();
        assert_eq!(cmds.len(), 6);
        for cmd in &cmds {
            assert_eq!(cmd[0], b'$');
            assert!(cmd.ends_with(b"\r\n"));
        }
        // La cadence d'abord, GSV un fix sur cinq en dernier
        assert!(cmds[0].starts_with(b"$PSRF103,00,6,00,0*"));
        assert!(cmds[5].starts_with(b"$PSRF103,03,00,05,01*"));
    }

    #[test]
    fn test_ublox_frame_sequence() {
        let frames = ublox_config_frames();
        // RATE, NAV5, GNSS, SBAS, 17 × MSG, PRT
        assert_eq!(frames.len(), 22);

        // Toutes les trames sont des CFG (classe 0x06) bien synchronisées
        for frame in &frames {
            assert_eq!(&frame[..2], &[0xB5, 0x62]);
            assert_eq!(frame[2], 0x06);
        }

        assert_eq!(frames[0][3], 0x08); // CFG-RATE
        assert_eq!(frames[1][3], 0x24); // CFG-NAV5
        assert_eq!(frames[2][3], 0x3E); // CFG-GNSS
        assert_eq!(frames[3][3], 0x16); // CFG-SBAS
        assert_eq!(frames[21][3], 0x00); // CFG-PRT en dernier
    }

    #[test]
    fn test_ublox_nav5_dynamic_model() {
        let frames = ublox_config_frames();
        let nav5 = &frames[1];
        // Charge utile de 36 octets : masque 0x0005, dyn 7, fix 3D seul
        assert_eq!(nav5[4], 36);
        assert_eq!(nav5[6], 0x05);
        assert_eq!(nav5[8], 0x07);
        assert_eq!(nav5[9], 0x02);
    }

    #[test]
    fn test_ublox_gnss_blocks() {
        let frames = ublox_config_frames();
        let gnss = &frames[2];
        // En-tête 4 octets + 5 blocs de 8
        assert_eq!(gnss[4], 44);
        // Bloc GPS : 8-16 canaux, activé
        assert_eq!(&gnss[6 + 4..6 + 12], &[0x00, 0x08, 0x10, 0x00, 0x01, 0x00, 0x01, 0x01]);
        // Bloc GLONASS : 8-14 canaux, activé
        assert_eq!(
            &gnss[6 + 36..6 + 44],
            &[0x06, 0x08, 0x0E, 0x00, 0x01, 0x00, 0x01, 0x01]
        );
    }

    #[test]
    fn test_uart1_port_config_baud_little_endian() {
        let cfg = uart1_port_config(38400);
        assert_eq!(cfg[0], 0x01);
        // 38400 = 0x9600
        assert_eq!(&cfg[8..12], &[0x00, 0x96, 0x00, 0x00]);
        assert_eq!(cfg[12], 0x03);
        assert_eq!(cfg[14], 0x02);
        // 8N1
        assert_eq!(cfg[4], 0xC0);
        assert_eq!(cfg[5], 0x08);
    }
}
