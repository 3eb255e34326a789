//! MIDI input: raw messages in, typed events out.

use rtrb::{Consumer, Producer, RingBuffer};

/// A parsed MIDI channel message.
///
/// Channels are 0-based (0..=15).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MidiEvent {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8 },
    /// 14-bit value, 8192 is centered
    PitchWheel { channel: u8, value: u16 },
    /// Controller 7
    Volume { channel: u8, value: u8 },
    /// Controller 1
    ModWheel { channel: u8, value: u8 },
    OtherControl { channel: u8, controller: u8, value: u8 },
}

impl MidiEvent {
    /// Parse a three-byte channel message.
    ///
    /// A note-on with velocity 0 is a note-off. Messages that carry none of
    /// the events above (aftertouch, program change, system) yield `None`.
    pub fn parse(message: [u8; 3]) -> Option<MidiEvent> {
        let [status, data1, data2] = message;
        let channel = status & 0x0F;
        let (data1, data2) = (data1 & 0x7F, data2 & 0x7F);

        match status & 0xF0 {
            0x80 => Some(MidiEvent::NoteOff {
                channel,
                note: data1,
            }),
            0x90 if data2 == 0 => Some(MidiEvent::NoteOff {
                channel,
                note: data1,
            }),
            0x90 => Some(MidiEvent::NoteOn {
                channel,
                note: data1,
                velocity: data2,
            }),
            0xB0 => Some(match data1 {
                1 => MidiEvent::ModWheel {
                    channel,
                    value: data2,
                },
                7 => MidiEvent::Volume {
                    channel,
                    value: data2,
                },
                controller => MidiEvent::OtherControl {
                    channel,
                    controller,
                    value: data2,
                },
            }),
            0xE0 => Some(MidiEvent::PitchWheel {
                channel,
                value: (data2 as u16) << 7 | data1 as u16,
            }),
            _ => None,
        }
    }

    pub fn channel(&self) -> u8 {
        match *self {
            MidiEvent::NoteOn { channel, .. }
            | MidiEvent::NoteOff { channel, .. }
            | MidiEvent::PitchWheel { channel, .. }
            | MidiEvent::Volume { channel, .. }
            | MidiEvent::ModWheel { channel, .. }
            | MidiEvent::OtherControl { channel, .. } => channel,
        }
    }
}

/// Producer handle for raw MIDI messages, typically owned by a MIDI driver callback.
///
/// The engine drains and parses the queue at the start of every block.
pub struct MidiInput {
    producer: Producer<[u8; 3]>,
}

impl MidiInput {
    pub(crate) fn new(capacity: usize) -> (MidiInput, Consumer<[u8; 3]>) {
        let (producer, consumer) = RingBuffer::new(capacity);
        (MidiInput { producer }, consumer)
    }

    /// Queue a raw three-byte message. Returns it back if the queue is full.
    pub fn send(&mut self, message: [u8; 3]) -> Result<(), [u8; 3]> {
        self.producer
            .push(message)
            .map_err(|rtrb::PushError::Full(m)| m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_on_with_zero_velocity_is_note_off() {
        assert_eq!(
            MidiEvent::parse([0x93, 60, 0]),
            Some(MidiEvent::NoteOff {
                channel: 3,
                note: 60
            })
        );
        assert_eq!(
            MidiEvent::parse([0x90, 60, 100]),
            Some(MidiEvent::NoteOn {
                channel: 0,
                note: 60,
                velocity: 100
            })
        );
    }

    #[test]
    fn controllers_are_split_out() {
        assert_eq!(
            MidiEvent::parse([0xB1, 7, 90]),
            Some(MidiEvent::Volume {
                channel: 1,
                value: 90
            })
        );
        assert_eq!(
            MidiEvent::parse([0xB0, 1, 5]),
            Some(MidiEvent::ModWheel {
                channel: 0,
                value: 5
            })
        );
        assert_eq!(
            MidiEvent::parse([0xB0, 64, 127]),
            Some(MidiEvent::OtherControl {
                channel: 0,
                controller: 64,
                value: 127
            })
        );
    }

    #[test]
    fn pitch_wheel_is_fourteen_bit() {
        assert_eq!(
            MidiEvent::parse([0xE0, 0x00, 0x40]),
            Some(MidiEvent::PitchWheel {
                channel: 0,
                value: 8192
            })
        );
        assert_eq!(MidiEvent::parse([0xC0, 5, 0]), None);
    }

    #[test]
    fn full_queue_hands_message_back() {
        let (mut input, _consumer) = MidiInput::new(1);
        assert!(input.send([0x90, 1, 1]).is_ok());
        assert_eq!(input.send([0x90, 2, 1]), Err([0x90, 2, 1]));
    }
}
