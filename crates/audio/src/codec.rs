//! Opus Encoder/Decoder Wrapper
//!
//! Kapselt audiopus und stellt eine einfache PCM16-basierte API bereit.
//! Beide WebSocket-Strecken des Relays sprechen mono; die Frame-Groesse
//! ist auf 20 ms festgelegt (Telefonie-Standard).

use audiopus::{
    coder::{Decoder, Encoder},
    Application, Channels, SampleRate,
};
use tracing::debug;

use crate::error::{AudioError, AudioResult};

/// Frame-Dauer in Millisekunden (vom Provider beim Call-Answer verhandelt)
pub const FRAME_MS: u32 = 20;

/// Ziel-Bitrate fuer Sprache in kbps
const BITRATE_KBPS: i32 = 32;

/// Encoder-Komplexitaet (0-10)
const KOMPLEXITAET: u8 = 5;

/// Opus-Encoder: kodiert PCM16 zu Opus-Bytes
pub struct OpusEncoder {
    encoder: Encoder,
    sample_rate_hz: u32,
    frame_size: usize,
}

impl OpusEncoder {
    /// Erstellt einen neuen Mono-Sprach-Encoder fuer die gegebene Abtastrate
    pub fn neu(sample_rate_hz: u32) -> AudioResult<Self> {
        let sample_rate = rate_zu_audiopus(sample_rate_hz)?;

        let mut encoder = Encoder::new(sample_rate, Channels::Mono, Application::Voip)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        encoder
            .set_bitrate(audiopus::Bitrate::BitsPerSecond(BITRATE_KBPS * 1000))
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        encoder
            .set_complexity(KOMPLEXITAET)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        encoder
            .set_vbr(true)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        // FEC gegen Paketverlust auf der Telefonie-Strecke
        encoder
            .set_inband_fec(true)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        let frame_size = samples_pro_frame(sample_rate_hz);

        debug!(
            sample_rate_hz,
            frame_size, "OpusEncoder erstellt ({}kbps Sprache)", BITRATE_KBPS
        );

        Ok(Self {
            encoder,
            sample_rate_hz,
            frame_size,
        })
    }

    /// Kodiert einen PCM16-Frame zu Opus-Bytes
    ///
    /// Die Eingabe muss exakt `frame_size()` Samples lang sein.
    pub fn encode(&mut self, pcm: &[i16]) -> AudioResult<Vec<u8>> {
        if pcm.len() != self.frame_size {
            return Err(AudioError::Konfiguration(format!(
                "PCM-Frame muss {} Samples lang sein, war {}",
                self.frame_size,
                pcm.len()
            )));
        }

        // Puffer: max. 4000 Bytes reicht fuer alle Opus-Frames
        let mut output = vec![0u8; 4000];
        let written = self
            .encoder
            .encode(pcm, &mut output)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        output.truncate(written);
        Ok(output)
    }

    /// Gibt die erwartete Frame-Groesse in Samples zurueck
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Gibt die Abtastrate zurueck
    pub fn sample_rate_hz(&self) -> u32 {
        self.sample_rate_hz
    }
}

/// Opus-Decoder: dekodiert Opus-Bytes zu PCM16
pub struct OpusDecoder {
    decoder: Decoder,
    sample_rate_hz: u32,
    frame_size: usize,
}

impl OpusDecoder {
    /// Erstellt einen neuen Mono-Decoder fuer die gegebene Abtastrate
    pub fn neu(sample_rate_hz: u32) -> AudioResult<Self> {
        let sr = rate_zu_audiopus(sample_rate_hz)?;

        let decoder =
            Decoder::new(sr, Channels::Mono).map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        let frame_size = samples_pro_frame(sample_rate_hz);

        debug!(sample_rate_hz, frame_size, "OpusDecoder erstellt");

        Ok(Self {
            decoder,
            sample_rate_hz,
            frame_size,
        })
    }

    /// Dekodiert Opus-Bytes zu PCM16
    pub fn decode(&mut self, opus_data: &[u8]) -> AudioResult<Vec<i16>> {
        let mut output = vec![0i16; self.frame_size];
        let decoded = self
            .decoder
            .decode(Some(opus_data), &mut output, false)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        output.truncate(decoded);
        Ok(output)
    }

    /// Gibt die erwartete Frame-Groesse in Samples zurueck
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Gibt die Abtastrate zurueck
    pub fn sample_rate_hz(&self) -> u32 {
        self.sample_rate_hz
    }
}

// ---------------------------------------------------------------------------
// Hilfsfunktionen
// ---------------------------------------------------------------------------

/// Samples pro 20-ms-Frame bei gegebener Abtastrate
pub fn samples_pro_frame(sample_rate_hz: u32) -> usize {
    (sample_rate_hz * FRAME_MS / 1000) as usize
}

fn rate_zu_audiopus(hz: u32) -> AudioResult<SampleRate> {
    match hz {
        8_000 => Ok(SampleRate::Hz8000),
        12_000 => Ok(SampleRate::Hz12000),
        16_000 => Ok(SampleRate::Hz16000),
        24_000 => Ok(SampleRate::Hz24000),
        48_000 => Ok(SampleRate::Hz48000),
        _ => Err(AudioError::Konfiguration(format!(
            "Abtastrate {} Hz wird von Opus nicht unterstuetzt",
            hz
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoder_konfiguration_telefonie() {
        let enc = OpusEncoder::neu(16_000);
        assert!(enc.is_ok(), "16kHz-Encoder sollte erstellbar sein");
        // 20ms bei 16kHz = 320 Samples
        assert_eq!(enc.unwrap().frame_size(), 320);
    }

    #[test]
    fn decoder_konfiguration_telefonie() {
        let dec = OpusDecoder::neu(16_000).unwrap();
        assert_eq!(dec.frame_size(), 320);
        assert_eq!(dec.sample_rate_hz(), 16_000);
    }

    #[test]
    fn ungueltige_abtastrate_fehler() {
        assert!(OpusEncoder::neu(44_100).is_err());
        assert!(OpusDecoder::neu(11_025).is_err());
    }

    #[test]
    fn encoder_falsche_frame_groesse_fehler() {
        let mut enc = OpusEncoder::neu(16_000).unwrap();
        // 320 Samples erwartet, aber 100 uebergeben
        let result = enc.encode(&vec![0i16; 100]);
        assert!(result.is_err());
    }

    #[test]
    fn encoder_decoder_roundtrip() {
        let mut enc = OpusEncoder::neu(16_000).unwrap();
        let mut dec = OpusDecoder::neu(16_000).unwrap();

        let frame_size = enc.frame_size();
        let pcm_in: Vec<i16> = (0..frame_size)
            .map(|i| ((i as f32 * 0.05).sin() * 8000.0) as i16)
            .collect();

        let encoded = enc.encode(&pcm_in).expect("Encoding sollte funktionieren");
        assert!(!encoded.is_empty());

        // Lossy, aber Frame- und Kanalanzahl bleiben erhalten
        let decoded = dec.decode(&encoded).expect("Decoding sollte funktionieren");
        assert_eq!(decoded.len(), frame_size);
    }

    #[test]
    fn mehrere_frames_nacheinander() {
        let mut enc = OpusEncoder::neu(16_000).unwrap();
        let mut dec = OpusDecoder::neu(16_000).unwrap();
        let stille = vec![0i16; enc.frame_size()];

        for _ in 0..5 {
            let encoded = enc.encode(&stille).unwrap();
            let decoded = dec.decode(&encoded).unwrap();
            assert_eq!(decoded.len(), 320);
        }
    }

    #[test]
    fn defekte_daten_werfen_fehler_statt_panik() {
        let mut dec = OpusDecoder::neu(16_000).unwrap();
        // Zufallsmuell ist kein gueltiger Opus-TOC – Fehler, kein Panic
        let result = dec.decode(&[0xDE, 0xAD, 0xBE, 0xEF, 0x01]);
        let _ = result; // beide Ausgaenge sind akzeptabel, nur kein Panic
    }

    #[test]
    fn samples_pro_frame_berechnung() {
        assert_eq!(samples_pro_frame(16_000), 320);
        assert_eq!(samples_pro_frame(24_000), 480);
        assert_eq!(samples_pro_frame(8_000), 160);
    }
}
