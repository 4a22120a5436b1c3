//! Buffer bookkeeping shared by the software codecs.
//!
//! Software codecs process input synchronously when it is queued, so all they need is:
//! - a fixed set of reusable input slots of a fixed capacity
//! - an output queue that announces the output format once before the first buffer
//! - a table of output buffers handed out but not yet released

use std::collections::{BTreeMap, VecDeque};

use crate::Result;
use crate::codec::Dequeued;
use crate::error::Error;
use crate::format::MediaFormat;
use crate::sample::SampleInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Free,
    Dequeued,
}

#[derive(Debug)]
pub struct CodecBuffers {
    inputs: Vec<Vec<u8>>,
    slots: Vec<Slot>,
    ready: VecDeque<(Vec<u8>, SampleInfo)>,
    held: BTreeMap<usize, Vec<u8>>,
    next_output_index: usize,
    output_format: Option<MediaFormat>,
    format_pending: bool,
    started: bool,
    released: bool,
}

impl CodecBuffers {
    pub fn new(input_slots: usize, input_capacity: usize) -> Self {
        let input_slots = input_slots.max(1);
        Self {
            inputs: vec![vec![0u8; input_capacity]; input_slots],
            slots: vec![Slot::Free; input_slots],
            ready: VecDeque::new(),
            held: BTreeMap::new(),
            next_output_index: 0,
            output_format: None,
            format_pending: false,
            started: false,
            released: false,
        }
    }

    pub fn start(&mut self) -> Result<()> {
        if self.released {
            return Err(Error::invariant("codec started after release"));
        }
        self.started = true;
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn dequeue_input(&mut self) -> Result<Option<usize>> {
        self.ensure_running()?;
        let free = self.slots.iter().position(|slot| *slot == Slot::Free);
        if let Some(index) = free {
            self.slots[index] = Slot::Dequeued;
        }
        Ok(free)
    }

    pub fn input_mut(&mut self, index: usize) -> Result<&mut [u8]> {
        self.ensure_dequeued(index)?;
        Ok(&mut self.inputs[index])
    }

    /// Take back a queued input slot, returning its valid bytes.
    pub fn take_input(&mut self, index: usize, info: &SampleInfo) -> Result<Vec<u8>> {
        self.ensure_dequeued(index)?;
        let input = &self.inputs[index];
        if info.size > input.len() {
            return Err(Error::codec(format!(
                "queued {} bytes into an input buffer of {} bytes",
                info.size,
                input.len()
            )));
        }

        let data = input[..info.size].to_vec();
        self.slots[index] = Slot::Free;
        Ok(data)
    }

    /// Set the output format. It is announced on the next `dequeue_output`.
    pub fn set_output_format(&mut self, format: MediaFormat) {
        self.output_format = Some(format);
        self.format_pending = true;
    }

    pub fn has_output_format(&self) -> bool {
        self.output_format.is_some()
    }

    pub fn push_output(&mut self, data: Vec<u8>, info: SampleInfo) {
        self.ready.push_back((data, info));
    }

    pub fn dequeue_output(&mut self) -> Result<Dequeued> {
        self.ensure_running()?;

        if self.format_pending {
            self.format_pending = false;
            return Ok(Dequeued::FormatChanged);
        }

        let Some((data, mut info)) = self.ready.pop_front() else {
            return Ok(Dequeued::TryAgainLater);
        };

        info.size = data.len();
        let index = self.next_output_index;
        self.next_output_index += 1;
        self.held.insert(index, data);
        Ok(Dequeued::Buffer { index, info })
    }

    pub fn output(&self, index: usize) -> Result<&[u8]> {
        self.held
            .get(&index)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::invariant(format!("output buffer {index} is not held")))
    }

    pub fn release_output(&mut self, index: usize) -> Result<()> {
        self.held
            .remove(&index)
            .map(|_| ())
            .ok_or_else(|| Error::invariant(format!("output buffer {index} released twice")))
    }

    pub fn output_format(&self) -> Result<MediaFormat> {
        self.output_format
            .clone()
            .ok_or_else(|| Error::invariant("output format requested before it was known"))
    }

    pub fn stop(&mut self) {
        self.started = false;
        self.ready.clear();
        self.held.clear();
        self.slots.fill(Slot::Free);
    }

    pub fn release(&mut self) {
        self.stop();
        self.released = true;
    }

    fn ensure_running(&self) -> Result<()> {
        if !self.started || self.released {
            return Err(Error::invariant("codec used before start or after release"));
        }
        Ok(())
    }

    fn ensure_dequeued(&self, index: usize) -> Result<()> {
        match self.slots.get(index) {
            Some(Slot::Dequeued) => Ok(()),
            _ => Err(Error::invariant(format!(
                "input buffer {index} was not dequeued"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::MIMETYPE_AUDIO_RAW;
    use crate::sample::SampleFlags;

    #[test]
    fn announces_format_before_the_first_buffer() -> anyhow::Result<()> {
        let mut buffers = CodecBuffers::new(1, 8);
        buffers.start()?;
        buffers.push_output(vec![1, 2], SampleInfo::new(2, 5, SampleFlags::NONE));
        buffers.set_output_format(MediaFormat::new(MIMETYPE_AUDIO_RAW));

        assert_eq!(buffers.dequeue_output()?, Dequeued::FormatChanged);
        let Dequeued::Buffer { index, info } = buffers.dequeue_output()? else {
            anyhow::bail!("expected a buffer");
        };
        assert_eq!(info.presentation_time_us, 5);
        assert_eq!(buffers.output(index)?, &[1, 2]);
        buffers.release_output(index)?;
        assert_eq!(buffers.dequeue_output()?, Dequeued::TryAgainLater);
        Ok(())
    }

    #[test]
    fn input_slots_are_reused_after_queueing() -> anyhow::Result<()> {
        let mut buffers = CodecBuffers::new(1, 4);
        buffers.start()?;

        let index = buffers
            .dequeue_input()?
            .ok_or_else(|| anyhow::anyhow!("no slot"))?;
        assert_eq!(buffers.dequeue_input()?, None);

        buffers.input_mut(index)?[..3].copy_from_slice(&[7, 8, 9]);
        let data = buffers.take_input(index, &SampleInfo::new(3, 0, SampleFlags::NONE))?;
        assert_eq!(data, vec![7, 8, 9]);
        assert_eq!(buffers.dequeue_input()?, Some(index));
        Ok(())
    }

    #[test]
    fn rejects_use_before_start() {
        let mut buffers = CodecBuffers::new(1, 4);
        assert!(matches!(buffers.dequeue_input(), Err(Error::Invariant(_))));
        assert!(matches!(buffers.dequeue_output(), Err(Error::Invariant(_))));
    }
}
