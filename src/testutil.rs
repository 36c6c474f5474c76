// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::{
    error::Error,
    future::Future,
    io::Cursor,
    time::{Duration, Instant},
};

use hound::{SampleFormat, WavSpec, WavWriter};

const TIMEOUT: Duration = Duration::from_secs(5);
const TICK: Duration = Duration::from_millis(10);

/// Wait for the given async predicate to return true or fail.
pub async fn eventually_async<F, Fut>(mut predicate: F, error_msg: &str)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = Instant::now();
    while !predicate().await {
        if start.elapsed() > TIMEOUT {
            panic!("{}", error_msg);
        }
        tokio::time::sleep(TICK).await;
    }
}

/// Encodes interleaved 16 bit samples as an in-memory WAV stream.
pub fn wav_bytes(
    samples: &[i16],
    channels: u16,
    sample_rate: u32,
) -> Result<Vec<u8>, Box<dyn Error>> {
    let mut cursor = Cursor::new(Vec::new());
    let mut writer = WavWriter::new(
        &mut cursor,
        WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        },
    )?;
    for sample in samples {
        writer.write_sample(*sample)?;
    }
    writer.finalize()?;

    Ok(cursor.into_inner())
}
