//! Buffer readback.
//!
//! After a script has run, its samples sit in the instrument's non-volatile
//! buffers. Each [`BufferChannel`] names one column (the source values or the
//! readings of one SMU unit) and renders the `printbuffer` query that dumps it
//! as a comma-separated list. Channels are correlated by position only, so a
//! kind's channels are always queried in their declared order and a length
//! mismatch rejects the whole read.

use crate::data::table::{Column, ColumnTable};
use crate::error::{BufferError, BufferParseError, ChannelSpecError};
use crate::instrument::session::Session;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// SMU unit of a two-channel source-measure instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Smu {
    /// Unit A (`smua`)
    A,
    /// Unit B (`smub`)
    B,
}

impl Smu {
    /// TSP name of the unit
    pub fn unit(self) -> &'static str {
        match self {
            Smu::A => "smua",
            Smu::B => "smub",
        }
    }

    /// TSP name of the unit's first non-volatile buffer
    pub fn buffer(self) -> &'static str {
        match self {
            Smu::A => "smua.nvbuffer1",
            Smu::B => "smub.nvbuffer1",
        }
    }
}

/// Which attribute of a buffer to dump
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BufferField {
    /// Values the unit sourced
    SourceValues,
    /// Values the unit measured
    Readings,
}

impl BufferField {
    fn attribute(self) -> &'static str {
        match self {
            BufferField::SourceValues => "sourcevalues",
            BufferField::Readings => "readings",
        }
    }
}

/// Named numeric column requested from an instrument buffer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferChannel {
    /// Column header in the result table
    pub name: Cow<'static, str>,
    /// Unit whose buffer is read
    pub smu: Smu,
    /// Attribute dumped from the buffer
    pub field: BufferField,
}

impl BufferChannel {
    /// Channel with a static header, usable in constant catalogues
    pub const fn new(name: &'static str, smu: Smu, field: BufferField) -> Self {
        Self {
            name: Cow::Borrowed(name),
            smu,
            field,
        }
    }

    /// Channel with a header built at runtime
    pub fn named(name: impl Into<String>, smu: Smu, field: BufferField) -> Self {
        Self {
            name: Cow::Owned(name.into()),
            smu,
            field,
        }
    }

    /// The dump query for this channel
    pub fn query(&self) -> String {
        let buffer = self.smu.buffer();
        format!(
            "printbuffer(1, {buffer}.n, {buffer}.{})",
            self.field.attribute()
        )
    }
}

impl FromStr for Smu {
    type Err = ChannelSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "smua" | "a" => Ok(Smu::A),
            "smub" | "b" => Ok(Smu::B),
            other => Err(ChannelSpecError::Smu(other.to_string())),
        }
    }
}

impl FromStr for BufferField {
    type Err = ChannelSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sourcevalues" => Ok(BufferField::SourceValues),
            "readings" => Ok(BufferField::Readings),
            other => Err(ChannelSpecError::Field(other.to_string())),
        }
    }
}

/// Parses `smua:readings` or `Label=smub:sourcevalues`.
///
/// Without a label the header is `<unit> <field>`, e.g. `smua readings`.
impl FromStr for BufferChannel {
    type Err = ChannelSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (label, target) = match s.split_once('=') {
            Some((label, target)) => (Some(label.trim()), target),
            None => (None, s),
        };
        let (smu, field) = target
            .split_once(':')
            .ok_or_else(|| ChannelSpecError::Format(s.to_string()))?;
        let smu: Smu = smu.parse()?;
        let field: BufferField = field.parse()?;

        let name = match label {
            Some("") => return Err(ChannelSpecError::Format(s.to_string())),
            Some(label) => label.to_string(),
            None => format!("{} {}", smu.unit(), field.attribute()),
        };
        Ok(BufferChannel::named(name, smu, field))
    }
}

impl fmt::Display for BufferChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Split a comma-separated dump into values.
///
/// A blank payload is an empty buffer; every other token must be a finite
/// number. The instrument reports overflow as `9.91e37`, so `nan` or `inf`
/// can only come from a garbled reply.
pub fn parse_payload(channel: &str, payload: &str) -> Result<Vec<f64>, BufferParseError> {
    if payload.trim().is_empty() {
        return Ok(Vec::new());
    }

    payload
        .split(',')
        .map(str::trim)
        .map(|token| match token.parse::<f64>() {
            Ok(value) if value.is_finite() => Ok(value),
            _ => Err(BufferParseError::Malformed {
                channel: channel.to_string(),
                token: token.to_string(),
            }),
        })
        .collect()
}

/// Assemble parsed channel payloads into a table, enforcing equal lengths.
pub fn assemble(
    channels: &[BufferChannel],
    payloads: Vec<Vec<f64>>,
    allow_empty: bool,
) -> Result<ColumnTable, BufferParseError> {
    let expected = payloads.first().map_or(0, Vec::len);

    for (channel, values) in channels.iter().zip(&payloads) {
        if values.len() != expected {
            return Err(BufferParseError::LengthMismatch {
                channel: channel.name.to_string(),
                expected,
                found: values.len(),
            });
        }
    }

    if expected == 0 && !allow_empty {
        return Err(BufferParseError::Empty);
    }

    let columns = channels
        .iter()
        .zip(payloads)
        .map(|(channel, values)| Column {
            name: channel.name.to_string(),
            values,
        })
        .collect();

    // Lengths were checked above
    ColumnTable::from_columns(columns).map_err(|(i, found)| BufferParseError::LengthMismatch {
        channel: channels[i].name.to_string(),
        expected,
        found,
    })
}

/// Query every channel in order and return the assembled table.
///
/// No partial table is ever returned: a malformed token, a length mismatch or
/// an unexpected empty read discards everything read so far.
pub async fn read_buffer(
    session: &mut Session,
    channels: &[BufferChannel],
    allow_empty: bool,
) -> Result<ColumnTable, BufferError> {
    let mut payloads = Vec::with_capacity(channels.len());

    for channel in channels {
        let raw = session.query(&channel.query()).await?;
        let values = parse_payload(&channel.name, &raw)?;
        debug!("Read {} values for '{}'", values.len(), channel.name);
        payloads.push(values);
    }

    Ok(assemble(channels, payloads, allow_empty)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockTransport;
    use crate::instrument::session::SessionConfig;

    const GATE_V: BufferChannel = BufferChannel::new("Gate Voltage [V]", Smu::B, BufferField::SourceValues);
    const GATE_I: BufferChannel = BufferChannel::new("Gate Leakage [A]", Smu::B, BufferField::Readings);

    fn session_with(mock: &MockTransport) -> Session {
        Session::with_transport(SessionConfig::default(), Box::new(mock.clone()))
    }

    #[test]
    fn test_channel_query_text() {
        assert_eq!(
            GATE_V.query(),
            "printbuffer(1, smub.nvbuffer1.n, smub.nvbuffer1.sourcevalues)"
        );
        let ch = BufferChannel::named("Channel Current [A]", Smu::A, BufferField::Readings);
        assert_eq!(
            ch.query(),
            "printbuffer(1, smua.nvbuffer1.n, smua.nvbuffer1.readings)"
        );
    }

    #[test]
    fn test_channel_from_text() {
        let ch: BufferChannel = "smua:readings".parse().unwrap();
        assert_eq!(ch.name, "smua readings");
        assert_eq!((ch.smu, ch.field), (Smu::A, BufferField::Readings));

        let ch: BufferChannel = "Gate Voltage [V]=SMUB:sourcevalues".parse().unwrap();
        assert_eq!(ch, GATE_V);
        assert_eq!(
            ch.query(),
            "printbuffer(1, smub.nvbuffer1.n, smub.nvbuffer1.sourcevalues)"
        );

        assert_eq!(
            "smuc:readings".parse::<BufferChannel>().unwrap_err(),
            ChannelSpecError::Smu("smuc".to_string())
        );
        assert_eq!(
            "smua:currents".parse::<BufferChannel>().unwrap_err(),
            ChannelSpecError::Field("currents".to_string())
        );
        assert!(matches!(
            "smua".parse::<BufferChannel>(),
            Err(ChannelSpecError::Format(_))
        ));
        assert!(matches!(
            "=smua:readings".parse::<BufferChannel>(),
            Err(ChannelSpecError::Format(_))
        ));
    }

    #[test]
    fn test_parse_payload_handles_exponents_and_spaces() {
        let values = parse_payload("x", "-2.00000e+01, 1.5E-9,3").unwrap();
        assert_eq!(values, vec![-20.0, 1.5e-9, 3.0]);
        assert!(parse_payload("x", "  \r").unwrap().is_empty());
    }

    #[test]
    fn test_parse_payload_rejects_garbage() {
        let err = parse_payload("Gate Leakage [A]", "1.0,nan?,2.0").unwrap_err();
        assert_eq!(
            err,
            BufferParseError::Malformed {
                channel: "Gate Leakage [A]".to_string(),
                token: "nan?".to_string(),
            }
        );

        // A trailing comma leaves an empty token
        assert!(parse_payload("x", "1.0,").is_err());
    }

    #[test]
    fn test_parse_payload_rejects_non_finite() {
        for payload in ["nan,1.0", "1.0,inf", "-infinity", "1.0, NaN"] {
            let err = parse_payload("Channel Current [A]", payload).unwrap_err();
            assert!(
                matches!(err, BufferParseError::Malformed { .. }),
                "{payload} should be rejected"
            );
        }

        // Overflow marker is an ordinary number
        assert_eq!(parse_payload("x", "9.91e37").unwrap(), vec![9.91e37]);
    }

    #[test]
    fn test_assemble_empty_requires_permission() {
        let channels = [GATE_V, GATE_I];
        let err = assemble(&channels, vec![vec![], vec![]], false).unwrap_err();
        assert_eq!(err, BufferParseError::Empty);

        let table = assemble(&channels, vec![vec![], vec![]], true).unwrap();
        assert_eq!(table.column_count(), 2);
        assert_eq!(table.row_count(), 0);
    }

    #[test]
    fn test_assemble_partial_empty_is_mismatch() {
        let channels = [GATE_V, GATE_I];
        let err = assemble(&channels, vec![vec![1.0], vec![]], true).unwrap_err();
        assert!(matches!(err, BufferParseError::LengthMismatch { found: 0, .. }));
    }

    #[tokio::test]
    async fn test_read_buffer_three_by_two() {
        let mock = MockTransport::new()
            .with_response(&GATE_V.query(), "2.0,1.5,1.0")
            .with_response(&GATE_I.query(), "0.0001,0.0002,0.0003");
        let mut session = session_with(&mock);

        let table = read_buffer(&mut session, &[GATE_V, GATE_I], false)
            .await
            .unwrap();

        assert_eq!(table.row_count(), 3);
        assert_eq!(table.names(), vec!["Gate Voltage [V]", "Gate Leakage [A]"]);
        assert_eq!(table.column("Gate Voltage [V]"), Some(&[2.0, 1.5, 1.0][..]));
        assert_eq!(mock.call_log(), vec![GATE_V.query(), GATE_I.query()]);
    }

    #[tokio::test]
    async fn test_read_buffer_length_mismatch_returns_no_table() {
        let mock = MockTransport::new()
            .with_response(&GATE_V.query(), "2.0,1.5,1.0")
            .with_response(&GATE_I.query(), "0.0001,0.0002");
        let mut session = session_with(&mock);

        let err = read_buffer(&mut session, &[GATE_V, GATE_I], false)
            .await
            .unwrap_err();

        match err {
            BufferError::Parse(BufferParseError::LengthMismatch {
                channel,
                expected,
                found,
            }) => {
                assert_eq!(channel, "Gate Leakage [A]");
                assert_eq!((expected, found), (3, 2));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_read_buffer_transport_failure() {
        let mock = MockTransport::new().with_response(&GATE_V.query(), "1.0");
        let mut session = session_with(&mock);

        // No response configured for the second channel
        let err = read_buffer(&mut session, &[GATE_V, GATE_I], false)
            .await
            .unwrap_err();
        assert!(matches!(err, BufferError::Transport(_)));
    }
}
