/// Downmix multi-channel input to mono while applying the provided converter so
/// the capture pipeline sees a single channel regardless of the microphone layout.
pub(crate) fn append_downmixed_samples<T, F>(
    buf: &mut Vec<f32>,
    data: &[T],
    channels: usize,
    mut convert: F,
) where
    T: Copy,
    F: FnMut(T) -> f32,
{
    if channels <= 1 {
        buf.extend(data.iter().copied().map(&mut convert));
        return;
    }

    // Average each interleaved frame to produce a mono representation.
    let mut acc = 0.0f32;
    let mut count = 0usize;
    for sample in data.iter().copied() {
        acc += convert(sample);
        count += 1;
        if count == channels {
            buf.push(acc / channels as f32);
            acc = 0.0;
            count = 0;
        }
    }
    if count > 0 {
        buf.push(acc / count as f32);
    }
}

/// Re-chunks whatever the driver hands us into fixed-size mono blocks.
///
/// Hosts rarely honour a requested buffer size, so the block cadence is
/// enforced here rather than in the device configuration.
pub(crate) struct BlockDispatcher {
    block_size: usize,
    pending: Vec<f32>,
    scratch: Vec<f32>,
}

impl BlockDispatcher {
    pub(crate) fn new(block_size: usize) -> Self {
        let block_size = block_size.max(1);
        Self {
            block_size,
            pending: Vec::with_capacity(block_size * 2),
            scratch: Vec::new(),
        }
    }

    pub(crate) fn push<T, F, S>(&mut self, data: &[T], channels: usize, convert: F, mut on_block: S)
    where
        T: Copy,
        F: FnMut(T) -> f32,
        S: FnMut(&[f32]),
    {
        self.scratch.clear();
        append_downmixed_samples(&mut self.scratch, data, channels, convert);
        self.pending.extend_from_slice(&self.scratch);

        let mut offset = 0;
        while self.pending.len() - offset >= self.block_size {
            on_block(&self.pending[offset..offset + self.block_size]);
            offset += self.block_size;
        }
        if offset > 0 {
            self.pending.drain(..offset);
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
