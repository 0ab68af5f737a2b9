use thiserror::Error;

/// Erreurs de validation d'une trame NMEA
#[derive(Error, Debug, PartialEq, Eq)]
pub enum NmeaError {
    #[error("Invalid NMEA framing: missing '$' prefix or '*' separator")]
    MissingFraming,

    #[error("Missing checksum: fewer than two bytes after asterisk")]
    ShortChecksum,

    #[error("Invalid checksum: not a hex value")]
    BadChecksumDigits,

    #[error("Checksum failed: calculated {calculated:#04X}, expected {expected:#04X}")]
    Mismatch { calculated: u8, expected: u8 },
}

/// Valide une trame NMEA `$<payload>*<hh>` et retourne le payload
///
/// Le checksum est le XOR de tous les octets entre `$` et `*`. Les octets
/// de fin de ligne éventuels après les deux chiffres hexadécimaux sont
/// ignorés.
pub fn validate_checksum(sentence: &str) -> Result<&str, NmeaError> {
    let body = sentence.strip_prefix('$').ok_or(NmeaError::MissingFraming)?;
    let (payload, checksum) = body.split_once('*').ok_or(NmeaError::MissingFraming)?;

    if checksum.len() < 2 {
        return Err(NmeaError::ShortChecksum);
    }
    let digits = checksum.get(..2).ok_or(NmeaError::BadChecksumDigits)?;
    let expected = u8::from_str_radix(digits, 16).map_err(|_| NmeaError::BadChecksumDigits)?;

    let mut calculated = 0u8;
    for b in payload.bytes() {
        calculated ^= b;
    }

    if calculated != expected {
        return Err(NmeaError::Mismatch {
            calculated,
            expected,
        });
    }

    Ok(payload)
}

/// Construit une commande NMEA complète `$<cmd>*<hh>\r\n` (hex minuscule)
pub fn make_nmea_cmd(cmd: &str) -> Vec<u8> {
    let mut checksum = 0u8;
    for b in cmd.bytes() {
        checksum ^= b;
    }
    format!("${}*{:02x}\r\n", cmd, checksum).into_bytes()
}

/// Checksum Fletcher-8 des trames UBX (u-blox, manuel de réf. p.62)
fn ubx_checksum(msg: &[u8]) -> [u8; 2] {
    let mut ck_a = 0u8;
    let mut ck_b = 0u8;
    for &b in msg {
        ck_a = ck_a.wrapping_add(b);
        ck_b = ck_b.wrapping_add(ck_a);
    }
    [ck_a, ck_b]
}

/// Construit une trame UBX complète : sync, classe, id, longueur
/// little-endian, payload, checksum Fletcher-8 sur classe..fin de payload
pub fn make_ubx_cfg(class: u8, id: u8, payload: &[u8]) -> Vec<u8> {
    let len = payload.len() as u16;
    let mut frame = Vec::with_capacity(8 + payload.len());
    frame.push(0xB5);
    frame.push(0x62);
    frame.push(class);
    frame.push(id);
    frame.push((len & 0xFF) as u8);
    frame.push((len >> 8) as u8);
    frame.extend_from_slice(payload);
    let chk = ubx_checksum(&frame[2..]);
    frame.push(chk[0]);
    frame.push(chk[1]);
    frame
}
