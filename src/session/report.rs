use std::fmt;

use ordered_float::OrderedFloat;
use tabled::{settings::Style, Table, Tabled};

use crate::error::SessionError;
use crate::session::coordinator::ScenarioSession;
use crate::session::observation::ObservationLog;

/// A wrapper around a float that limits the number of decimal places when printed.
#[derive(Clone, Copy, PartialEq, PartialOrd)]
pub(crate) struct FloatWrapper {
    pub(crate) value: f64,
    pub(crate) precision: usize, // Number of decimal places to display
}

impl FloatWrapper {
    pub fn new(value: f64, precision: usize) -> Self {
        FloatWrapper { value, precision }
    }
}

impl fmt::Display for FloatWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1$}", self.value, self.precision)
    }
}

impl fmt::Debug for FloatWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1$}", self.value, self.precision)
    }
}

/// Table row summarizing one observation channel over the session.
#[derive(Debug, Tabled)]
pub(crate) struct ChannelResTable {
    pub(crate) channel: usize,
    pub(crate) min: FloatWrapper,
    pub(crate) max: FloatWrapper,
    pub(crate) last: FloatWrapper,
}

fn channel_rows(log: &ObservationLog) -> Vec<ChannelResTable> {
    let Some((_, last)) = log.last() else {
        return Vec::new();
    };
    (0..last.len())
        .map(|ch| {
            let series = log.data.iter().map(|v| v[ch]);
            let min = series
                .clone()
                .min_by_key(|x| OrderedFloat(*x))
                .unwrap_or(f64::NAN);
            let max = series
                .clone()
                .max_by_key(|x| OrderedFloat(*x))
                .unwrap_or(f64::NAN);
            ChannelResTable {
                channel: ch,
                min: FloatWrapper::new(min, 5),
                max: FloatWrapper::new(max, 5),
                last: FloatWrapper::new(last[ch], 5),
            }
        })
        .collect()
}

/// Reporting surface of a scenario session.
pub trait SessionReporting {
    /// Prints the five schema identifier lists to stdout, one line each,
    /// in the order: generator buses, generator ids, load buses, load ids,
    /// bus ids.
    fn print_observation_lists(&mut self) -> Result<(), SessionError>;

    /// Prints a per-channel min/max/last summary table to stderr.
    fn print_channel_summary(&mut self);
}

impl SessionReporting for ScenarioSession {
    fn print_observation_lists(&mut self) -> Result<(), SessionError> {
        let schema = self.observation_schema()?;
        println!("{:?}", schema.gen_buses);
        println!("{:?}", schema.gen_ids);
        println!("{:?}", schema.load_buses);
        println!("{:?}", schema.load_ids);
        println!("{:?}", schema.bus_ids);
        Ok(())
    }

    fn print_channel_summary(&mut self) {
        let rows = channel_rows(self.observation_log());
        let table = Table::new(rows).with(Style::markdown()).to_string();
        eprintln!("{table}");
    }
}
