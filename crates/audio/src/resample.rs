//! Lineares Resampling und Frame-Anpassung
//!
//! Die KI-Session liefert Audio in ihrer nativen Abtastrate (z.B. 24 kHz),
//! die Telefonie-Strecke erwartet die beim Call-Answer verhandelte Rate
//! (z.B. 16 kHz). Lineare Interpolation reicht fuer Sprachqualitaet auf
//! der Telefonstrecke; ein Polyphasen-Filter waere hier Overkill.

use crate::error::{AudioError, AudioResult};

/// Resamplet PCM16 von `von_hz` nach `nach_hz` per linearer Interpolation
///
/// Identische Raten geben die Eingabe unveraendert zurueck. Fehler gibt es
/// nur bei einer Null-Rate; Aufrufer behandeln einen Fehler als degradierten
/// Durchreich-Pfad (unresampeltes Audio ist besser als Stille).
pub fn resample_linear(input: &[i16], von_hz: u32, nach_hz: u32) -> AudioResult<Vec<i16>> {
    if von_hz == 0 || nach_hz == 0 {
        return Err(AudioError::Resampling(format!(
            "Abtastrate 0 ist ungueltig (von={} nach={})",
            von_hz, nach_hz
        )));
    }
    if von_hz == nach_hz || input.is_empty() {
        return Ok(input.to_vec());
    }

    let ziel_len = (input.len() as u64 * nach_hz as u64 / von_hz as u64) as usize;
    if ziel_len == 0 {
        return Ok(Vec::new());
    }

    let schritt = von_hz as f64 / nach_hz as f64;
    let mut output = Vec::with_capacity(ziel_len);

    for i in 0..ziel_len {
        let quell_pos = i as f64 * schritt;
        let index = quell_pos as usize;
        let frac = quell_pos - index as f64;

        let a = input[index.min(input.len() - 1)] as f64;
        let b = input[(index + 1).min(input.len() - 1)] as f64;
        output.push((a + (b - a) * frac).round() as i16);
    }

    Ok(output)
}

/// Passt einen PCM-Puffer auf die exakte Codec-Frame-Groesse an
///
/// Zu kurze Puffer werden mit Stille aufgefuellt, zu lange abgeschnitten.
/// Der Opus-Encoder akzeptiert nur exakte Frame-Groessen.
pub fn frame_anpassen(mut pcm: Vec<i16>, ziel_len: usize) -> Vec<i16> {
    pcm.resize(ziel_len, 0);
    pcm
}

#[cfg(test)]
mod tests {
    use super::*;

    fn testsignal(len: usize) -> Vec<i16> {
        (0..len)
            .map(|i| ((i as f32 * 0.03).sin() * 10_000.0) as i16)
            .collect()
    }

    #[test]
    fn downsample_24k_nach_16k() {
        let input = testsignal(480); // 20ms @ 24kHz
        let output = resample_linear(&input, 24_000, 16_000).unwrap();
        assert_eq!(output.len(), 320); // 20ms @ 16kHz
    }

    #[test]
    fn upsample_16k_nach_24k() {
        let input = testsignal(320);
        let output = resample_linear(&input, 16_000, 24_000).unwrap();
        assert_eq!(output.len(), 480);
    }

    #[test]
    fn roundtrip_erhaelt_sample_anzahl_annaehernd() {
        // A -> B -> A: Laenge bleibt innerhalb einer kleinen Toleranz
        let input = testsignal(480);
        let hin = resample_linear(&input, 24_000, 16_000).unwrap();
        let zurueck = resample_linear(&hin, 16_000, 24_000).unwrap();
        let diff = (zurueck.len() as i64 - input.len() as i64).abs();
        assert!(diff <= 1, "Laengendrift {} zu gross", diff);
    }

    #[test]
    fn identische_raten_durchreichen() {
        let input = testsignal(320);
        let output = resample_linear(&input, 16_000, 16_000).unwrap();
        assert_eq!(input, output);
    }

    #[test]
    fn leere_eingabe() {
        let output = resample_linear(&[], 24_000, 16_000).unwrap();
        assert!(output.is_empty());
    }

    #[test]
    fn null_rate_ist_fehler() {
        assert!(resample_linear(&[1, 2, 3], 0, 16_000).is_err());
        assert!(resample_linear(&[1, 2, 3], 16_000, 0).is_err());
    }

    #[test]
    fn konstantes_signal_bleibt_konstant() {
        let input = vec![1000i16; 480];
        let output = resample_linear(&input, 24_000, 16_000).unwrap();
        assert!(output.iter().all(|&s| s == 1000));
    }

    #[test]
    fn frame_anpassen_auffuellen() {
        let pcm = vec![5i16; 300];
        let angepasst = frame_anpassen(pcm, 320);
        assert_eq!(angepasst.len(), 320);
        assert_eq!(angepasst[299], 5);
        assert_eq!(angepasst[300], 0); // Stille am Ende
    }

    #[test]
    fn frame_anpassen_abschneiden() {
        let pcm = vec![5i16; 400];
        let angepasst = frame_anpassen(pcm, 320);
        assert_eq!(angepasst.len(), 320);
    }
}
