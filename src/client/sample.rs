//! The audio-app side of a stream: byte-oriented producer and consumer
//! contracts, plus typed adapters over the native-endian byte buffers.

use crate::proto::SampleFormat;

/// An error carried out of a sample callback.
pub type StreamError = Box<dyn std::error::Error + Send + Sync>;

/// How a sample source ends its stream.
#[derive(Debug)]
pub enum SourceEnd {
    /// The source is cleanly exhausted. Not recorded as a stream error.
    EndOfData,
    /// The source failed; the error is recorded on the stream.
    Error(StreamError),
}

/// A producer of audio data for a playback stream.
///
/// The engine calls [`read`](SampleSource::read) with a buffer sized to
/// the server's outstanding request; the source fills a prefix with whole
/// samples and returns the byte count. Returning zero bytes or
/// [`SourceEnd::EndOfData`] stops the stream cleanly.
pub trait SampleSource: Send + 'static {
    /// The sample encoding this source produces.
    fn format(&self) -> SampleFormat;

    /// The size of one sample in bytes.
    fn bytes_per_sample(&self) -> usize {
        self.format().bytes_per_sample()
    }

    /// Fills `buf` with up to `buf.len()` bytes, a whole number of
    /// samples, and returns how many bytes were written.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, SourceEnd>;
}

/// A consumer of audio data from a record stream.
///
/// Called on the connection's reader thread for every data packet, so it
/// must be bounded and non-blocking. Returning an error stops the stream.
pub trait SampleSink: Send + 'static {
    /// The sample encoding this sink expects.
    fn format(&self) -> SampleFormat;

    /// Consumes one packet of audio data.
    fn write(&mut self, data: &[u8]) -> Result<(), StreamError>;
}

/// A primitive sample type with a native-endian byte representation.
trait Sample: Copy + Default + Send + 'static {
    const BYTES: usize;
    fn native_format() -> SampleFormat;
    fn put(self, out: &mut [u8]);
    fn get(src: &[u8]) -> Self;
}

impl Sample for u8 {
    const BYTES: usize = 1;

    fn native_format() -> SampleFormat {
        SampleFormat::U8
    }

    fn put(self, out: &mut [u8]) {
        out[0] = self;
    }

    fn get(src: &[u8]) -> Self {
        src[0]
    }
}

macro_rules! wide_sample {
    ($ty:ty, $bytes:expr, $format:expr) => {
        impl Sample for $ty {
            const BYTES: usize = $bytes;

            fn native_format() -> SampleFormat {
                $format
            }

            fn put(self, out: &mut [u8]) {
                out.copy_from_slice(&self.to_ne_bytes());
            }

            fn get(src: &[u8]) -> Self {
                <$ty>::from_ne_bytes(src.try_into().unwrap())
            }
        }
    };
}

wide_sample!(i16, 2, SampleFormat::s16_ne());
wide_sample!(i32, 4, SampleFormat::s32_ne());
wide_sample!(f32, 4, SampleFormat::float32_ne());

struct TypedSource<T, F> {
    scratch: Vec<T>,
    f: F,
}

impl<T, F> SampleSource for TypedSource<T, F>
where
    T: Sample,
    F: FnMut(&mut [T]) -> Result<usize, SourceEnd> + Send + 'static,
{
    fn format(&self) -> SampleFormat {
        T::native_format()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, SourceEnd> {
        let samples = buf.len() / T::BYTES;
        self.scratch.resize(samples, T::default());

        let n = (self.f)(&mut self.scratch[..samples])?.min(samples);
        for (sample, out) in self.scratch[..n].iter().zip(buf.chunks_exact_mut(T::BYTES)) {
            sample.put(out);
        }

        Ok(n * T::BYTES)
    }
}

struct TypedSink<T, F> {
    scratch: Vec<T>,
    f: F,
}

impl<T, F> SampleSink for TypedSink<T, F>
where
    T: Sample,
    F: FnMut(&[T]) -> Result<(), StreamError> + Send + 'static,
{
    fn format(&self) -> SampleFormat {
        T::native_format()
    }

    fn write(&mut self, data: &[u8]) -> Result<(), StreamError> {
        self.scratch.clear();
        self.scratch
            .extend(data.chunks_exact(T::BYTES).map(T::get));

        (self.f)(&self.scratch)
    }
}

/// A source producing raw `u8` samples directly from a callback.
pub fn source_from_u8<F>(f: F) -> impl SampleSource
where
    F: FnMut(&mut [u8]) -> Result<usize, SourceEnd> + Send + 'static,
{
    TypedSource {
        scratch: Vec::new(),
        f,
    }
}

/// A source producing `i16` samples, encoded host-endian on the wire.
pub fn source_from_i16<F>(f: F) -> impl SampleSource
where
    F: FnMut(&mut [i16]) -> Result<usize, SourceEnd> + Send + 'static,
{
    TypedSource {
        scratch: Vec::new(),
        f,
    }
}

/// A source producing `i32` samples, encoded host-endian on the wire.
pub fn source_from_i32<F>(f: F) -> impl SampleSource
where
    F: FnMut(&mut [i32]) -> Result<usize, SourceEnd> + Send + 'static,
{
    TypedSource {
        scratch: Vec::new(),
        f,
    }
}

/// A source producing `f32` samples, encoded host-endian on the wire.
pub fn source_from_f32<F>(f: F) -> impl SampleSource
where
    F: FnMut(&mut [f32]) -> Result<usize, SourceEnd> + Send + 'static,
{
    TypedSource {
        scratch: Vec::new(),
        f,
    }
}

/// A sink receiving raw `u8` samples.
pub fn sink_from_u8<F>(f: F) -> impl SampleSink
where
    F: FnMut(&[u8]) -> Result<(), StreamError> + Send + 'static,
{
    TypedSink {
        scratch: Vec::new(),
        f,
    }
}

/// A sink receiving `i16` samples decoded from the host-endian stream.
pub fn sink_from_i16<F>(f: F) -> impl SampleSink
where
    F: FnMut(&[i16]) -> Result<(), StreamError> + Send + 'static,
{
    TypedSink {
        scratch: Vec::new(),
        f,
    }
}

/// A sink receiving `i32` samples decoded from the host-endian stream.
pub fn sink_from_i32<F>(f: F) -> impl SampleSink
where
    F: FnMut(&[i32]) -> Result<(), StreamError> + Send + 'static,
{
    TypedSink {
        scratch: Vec::new(),
        f,
    }
}

/// A sink receiving `f32` samples decoded from the host-endian stream.
pub fn sink_from_f32<F>(f: F) -> impl SampleSink
where
    F: FnMut(&[f32]) -> Result<(), StreamError> + Send + 'static,
{
    TypedSink {
        scratch: Vec::new(),
        f,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i16_source_writes_native_endian_bytes() {
        let mut source = source_from_i16(|buf: &mut [i16]| {
            for (i, s) in buf.iter_mut().enumerate() {
                *s = i as i16 - 1;
            }
            Ok(buf.len())
        });

        assert_eq!(source.format(), SampleFormat::s16_ne());
        assert_eq!(source.bytes_per_sample(), 2);

        let mut buf = [0u8; 7];
        // Only whole samples fit: 3 of them.
        let n = source.read(&mut buf).unwrap();
        assert_eq!(n, 6);
        assert_eq!(&buf[0..2], &(-1i16).to_ne_bytes());
        assert_eq!(&buf[2..4], &0i16.to_ne_bytes());
        assert_eq!(&buf[4..6], &1i16.to_ne_bytes());
    }

    #[test]
    fn partial_fill_is_respected() {
        let mut source = source_from_f32(|buf: &mut [f32]| {
            buf[0] = 0.5;
            Ok(1)
        });

        let mut buf = [0u8; 16];
        assert_eq!(source.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf[0..4], &0.5f32.to_ne_bytes());
    }

    #[test]
    fn end_of_data_passes_through() {
        let mut calls = 0;
        let mut source = source_from_i16(move |_buf: &mut [i16]| {
            calls += 1;
            if calls > 1 {
                Err(SourceEnd::EndOfData)
            } else {
                Ok(0)
            }
        });

        let mut buf = [0u8; 4];
        assert_eq!(source.read(&mut buf).unwrap(), 0);
        assert!(matches!(
            source.read(&mut buf),
            Err(SourceEnd::EndOfData)
        ));
    }

    #[test]
    fn i16_sink_decodes_native_endian_bytes() {
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let mut sink = sink_from_i16(move |samples: &[i16]| {
            seen2.lock().unwrap().extend_from_slice(samples);
            Ok(())
        });

        let mut data = Vec::new();
        for s in [-1000i16, 0, 1000] {
            data.extend_from_slice(&s.to_ne_bytes());
        }

        sink.write(&data).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![-1000, 0, 1000]);
    }

    #[test]
    fn sink_errors_surface() {
        let mut sink = sink_from_u8(|_data: &[u8]| Err("saturated".into()));
        assert!(sink.write(&[0, 1, 2]).is_err());
    }
}
