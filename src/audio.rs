use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::path::Path;
use std::time::Duration;

/// Length of a WAV file, rounded up so the video never cuts the last sample.
pub fn wav_duration_ms(path: &Path) -> Result<u64, hound::Error> {
    let reader = WavReader::open(path)?;
    let spec = reader.spec();
    let frames = reader.duration() as u64;
    Ok(frames_to_ms(frames, spec.sample_rate))
}

fn frames_to_ms(frames: u64, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    (frames * 1000).div_ceil(sample_rate as u64)
}

/// Copies `input` to `output` with `silence` of zero samples before and after.
/// Returns the duration of the padded file.
pub fn pad_with_silence(input: &Path, output: &Path, silence: Duration) -> Result<u64, hound::Error> {
    let mut reader = WavReader::open(input)?;
    let spec = reader.spec();
    let pad_frames = silence.as_millis() as u64 * spec.sample_rate as u64 / 1000;
    let pad_samples = pad_frames * spec.channels as u64;

    let mut writer = WavWriter::create(output, spec)?;
    match spec.sample_format {
        SampleFormat::Int => {
            for _ in 0..pad_samples {
                write_zero(&mut writer, spec)?;
            }
            for sample in reader.samples::<i32>() {
                write_int(&mut writer, spec, sample?)?;
            }
            for _ in 0..pad_samples {
                write_zero(&mut writer, spec)?;
            }
        }
        SampleFormat::Float => {
            for _ in 0..pad_samples {
                writer.write_sample(0.0f32)?;
            }
            for sample in reader.samples::<f32>() {
                writer.write_sample(sample?)?;
            }
            for _ in 0..pad_samples {
                writer.write_sample(0.0f32)?;
            }
        }
    }
    let frames = writer.duration() as u64;
    writer.finalize()?;
    Ok(frames_to_ms(frames, spec.sample_rate))
}

fn write_zero<W: std::io::Write + std::io::Seek>(
    writer: &mut WavWriter<W>,
    spec: WavSpec,
) -> Result<(), hound::Error> {
    write_int(writer, spec, 0)
}

// hound checks the sample type against bits_per_sample, so narrow ints first.
fn write_int<W: std::io::Write + std::io::Seek>(
    writer: &mut WavWriter<W>,
    spec: WavSpec,
    sample: i32,
) -> Result<(), hound::Error> {
    match spec.bits_per_sample {
        8 => writer.write_sample(sample as i8),
        16 => writer.write_sample(sample as i16),
        _ => writer.write_sample(sample),
    }
}

#[cfg(test)]
pub(crate) fn write_tone(path: &Path, sample_rate: u32, frames: u32) {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec).unwrap();
    for i in 0..frames {
        writer.write_sample(((i % 100) as i16 - 50) * 100).unwrap();
    }
    writer.finalize().unwrap();
}
