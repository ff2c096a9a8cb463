//! Request handlers.

use crate::config::StationConfig;
use crate::database::{Database, PointKind};
use crate::session::{Selection, Session};
use dnpwire_protocol::frame::RangeLayout;
use dnpwire_protocol::{
    ControlCode, Crob, CrobCode, DataObject, Group, InternalIndicators, Message, PrefixCode,
    ProtocolError,
};
use std::sync::Arc;

/// Delay advertised after a cold restart.
pub const COLD_RESTART_DELAY_MS: u16 = 5000;

/// Delay advertised after a warm restart.
pub const WARM_RESTART_DELAY_MS: u16 = 1000;

/// Point flag: the point is online.
const FLAG_ONLINE: u8 = 0x01;
/// Point flag: binary state.
const FLAG_STATE: u8 = 0x80;

const ATTRIBUTE_PRODUCT_NAME: u8 = 250;
const ATTRIBUTE_VENDOR_NAME: u8 = 252;
const ATTRIBUTE_ALL: u8 = 254;

/// Group 80 index of the restart indication.
const RESTART_BIT: u32 = 7;

/// Link addresses 0xFFFD-0xFFFF reach every outstation.
pub fn is_broadcast(address: u16) -> bool {
    address >= 0xFFFD
}

fn binary_flags(on: bool) -> u8 {
    if on {
        FLAG_ONLINE | FLAG_STATE
    } else {
        FLAG_ONLINE
    }
}

fn now_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

fn out_of_range(start: u16, stop: u16) -> ProtocolError {
    ProtocolError::InvalidParam(format!("points {start}-{stop} do not exist"))
}

/// Points named by a read, or `None` when the station has none to report.
fn requested(object: &DataObject, len: usize) -> Result<Option<(u16, u16)>, ProtocolError> {
    if matches!(object.qualifier.prefix, PrefixCode::Index(_) | PrefixCode::Size(_)) {
        return Err(ProtocolError::InvalidQualifier(object.qualifier.bits()));
    }
    let (start, stop) = match object.qualifier.range.layout() {
        RangeLayout::None => match len.checked_sub(1) {
            Some(last) => (0, last as u32),
            None => return Ok(None),
        },
        RangeLayout::StartStop { .. } => (object.address_start, object.address_end),
        RangeLayout::Count { .. } => match object.point_count.checked_sub(1) {
            Some(last) => (0, last),
            None => return Ok(None),
        },
    };
    if stop as usize >= len {
        return Err(ProtocolError::InvalidParam(format!(
            "points {start}-{stop} requested, {len} configured"
        )));
    }
    Ok(Some((start as u16, stop as u16)))
}

fn add_encoded(
    response: &mut Message,
    group: Group,
    variation: u8,
    start: u16,
    points: &[Vec<u8>],
) -> Result<(), ProtocolError> {
    let refs: Vec<&[u8]> = points.iter().map(Vec::as_slice).collect();
    response.add_points(group, variation, start, &refs)
}

/// One relay output block from a control request.
#[derive(Debug, Clone, Copy)]
struct Control {
    variation: u8,
    index: u16,
    crob: Crob,
}

/// Answers master requests from the point database.
pub struct Handler {
    db: Arc<Database>,
    station: StationConfig,
}

impl Handler {
    pub fn new(db: Arc<Database>, station: StationConfig) -> Self {
        Self { db, station }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn station(&self) -> &StationConfig {
        &self.station
    }

    /// Whether `request` is for this station and from a master it serves.
    pub fn accepts(&self, request: &Message) -> bool {
        if request.control.is_response() {
            return false;
        }
        let addressed = request.dest == self.station.address || is_broadcast(request.dest);
        addressed
            && (self.station.accept_any_master || request.source == self.station.master_address)
    }

    /// Executes `request` and returns the response to send. Confirms and
    /// broadcast requests are executed without an answer.
    pub fn handle(&self, session: &mut Session, request: &mut Message) -> Option<Message> {
        session.touch();
        if request.control == ControlCode::Confirm {
            return None;
        }
        // A select only arms the request that immediately follows it.
        let selection = session.take_selection();

        let mut response = Message::response_to(request);
        response.source = self.station.address;
        let mut iin = InternalIndicators::new();

        let result = match request.control {
            ControlCode::Read => self.read(request, &mut response, &mut iin),
            ControlCode::Write => self.write(request, &mut iin),
            ControlCode::Select => self.select(session, request, &mut response),
            ControlCode::Operate => self.operate(selection.as_ref(), request, &mut response),
            ControlCode::DirectOperate => self.direct_operate(request, &mut response),
            ControlCode::ColdRestart => self.restart(true, &mut response),
            ControlCode::WarmRestart => self.restart(false, &mut response),
            other => Err(ProtocolError::UnknownControlCode(other.code())),
        };
        if let Err(e) = result {
            tracing::warn!(
                session = %session.id,
                control = ?request.control,
                "Request failed: {}",
                e
            );
            iin = iin.with(e.indicator().bits());
        }
        response.indicators = self.db.indicators().with(iin.bits());

        if is_broadcast(request.dest) {
            tracing::debug!(session = %session.id, "Broadcast request, no response");
            return None;
        }
        Some(response)
    }

    fn read(
        &self,
        request: &mut Message,
        response: &mut Message,
        iin: &mut InternalIndicators,
    ) -> Result<(), ProtocolError> {
        while let Some(object) = request.next_object()? {
            match self.read_object(&object, response) {
                Ok(()) => {}
                Err(e @ ProtocolError::BufferTooSmall { .. }) => return Err(e),
                Err(e) => {
                    tracing::debug!(
                        group = object.group.0,
                        variation = object.variation,
                        "Read rejected: {}",
                        e
                    );
                    *iin = iin.with(e.indicator().bits());
                }
            }
        }
        Ok(())
    }

    fn read_object(&self, object: &DataObject, response: &mut Message) -> Result<(), ProtocolError> {
        let kind = match (object.group, object.variation) {
            (Group::BINARY_INPUT, 0..=2) => PointKind::BinaryInput,
            (Group::BINARY_OUTPUT, 0..=2) => PointKind::BinaryOutput,
            (Group::COUNTER, 0 | 1 | 5) => PointKind::Counter,
            (Group::ANALOG_INPUT, 0 | 1 | 3) => PointKind::AnalogInput,
            (Group::CLASS_OBJECTS, 1) => return self.read_static(response),
            // No events are buffered.
            (Group::CLASS_OBJECTS, 2..=4) => return Ok(()),
            (Group::TIME, 1) => return response.add_time(now_ms()),
            (Group::DEVICE_ATTRIBUTE, variation) => {
                return self.read_attribute(variation, response)
            }
            (group, variation) => {
                return Err(ProtocolError::UnknownObject {
                    group: group.0,
                    variation,
                })
            }
        };

        let Some((start, stop)) = requested(object, self.db.len(kind))? else {
            return Ok(());
        };
        self.add_range(kind, object.variation, start, stop, response)
    }

    /// Appends points `start..=stop` of `kind`; variation 0 picks the
    /// flagged variation.
    fn add_range(
        &self,
        kind: PointKind,
        variation: u8,
        start: u16,
        stop: u16,
        response: &mut Message,
    ) -> Result<(), ProtocolError> {
        match kind {
            PointKind::BinaryInput | PointKind::BinaryOutput => {
                let group = if kind == PointKind::BinaryInput {
                    Group::BINARY_INPUT
                } else {
                    Group::BINARY_OUTPUT
                };
                let variation = if variation == 0 { 2 } else { variation };
                let states = self
                    .db
                    .binary(kind, start, stop)
                    .ok_or_else(|| out_of_range(start, stop))?;
                let encoded: Vec<u8> = states
                    .iter()
                    .map(|&on| if variation == 1 { u8::from(on) } else { binary_flags(on) })
                    .collect();
                response.add_binary_states(group, variation, start, &encoded, false)
            }
            PointKind::Counter => {
                let variation = if variation == 0 { 1 } else { variation };
                let values = self
                    .db
                    .counters(start, stop)
                    .ok_or_else(|| out_of_range(start, stop))?;
                let encoded: Vec<Vec<u8>> = values
                    .iter()
                    .map(|value| {
                        let mut point = Vec::with_capacity(5);
                        if variation == 1 {
                            point.push(FLAG_ONLINE);
                        }
                        point.extend_from_slice(&value.to_le_bytes());
                        point
                    })
                    .collect();
                add_encoded(response, Group::COUNTER, variation, start, &encoded)
            }
            PointKind::AnalogInput => {
                let variation = if variation == 0 { 1 } else { variation };
                let values = self
                    .db
                    .analogs(start, stop)
                    .ok_or_else(|| out_of_range(start, stop))?;
                let encoded: Vec<Vec<u8>> = values
                    .iter()
                    .map(|value| {
                        let mut point = Vec::with_capacity(5);
                        if variation == 1 {
                            point.push(FLAG_ONLINE);
                        }
                        point.extend_from_slice(&value.to_le_bytes());
                        point
                    })
                    .collect();
                add_encoded(response, Group::ANALOG_INPUT, variation, start, &encoded)
            }
        }
    }

    /// Class 0: every static point.
    fn read_static(&self, response: &mut Message) -> Result<(), ProtocolError> {
        for kind in [
            PointKind::BinaryInput,
            PointKind::BinaryOutput,
            PointKind::Counter,
            PointKind::AnalogInput,
        ] {
            if let Some(last) = self.db.len(kind).checked_sub(1) {
                self.add_range(kind, 0, 0, last as u16, response)?;
            }
        }
        Ok(())
    }

    fn read_attribute(&self, variation: u8, response: &mut Message) -> Result<(), ProtocolError> {
        match variation {
            ATTRIBUTE_PRODUCT_NAME => {
                response.add_device_attribute_value(variation, &self.station.product_name)
            }
            ATTRIBUTE_VENDOR_NAME => {
                response.add_device_attribute_value(variation, &self.station.vendor_name)
            }
            ATTRIBUTE_ALL => {
                response.add_device_attribute_value(
                    ATTRIBUTE_PRODUCT_NAME,
                    &self.station.product_name,
                )?;
                response
                    .add_device_attribute_value(ATTRIBUTE_VENDOR_NAME, &self.station.vendor_name)
            }
            _ => Err(ProtocolError::UnknownObject {
                group: Group::DEVICE_ATTRIBUTE.0,
                variation,
            }),
        }
    }

    fn write(
        &self,
        request: &mut Message,
        iin: &mut InternalIndicators,
    ) -> Result<(), ProtocolError> {
        while let Some(object) = request.next_object()? {
            match (object.group, object.variation) {
                (Group::INTERNAL_INDICATIONS, 1) => {
                    while let Some(point) = request.next_value()? {
                        let on = point.data.as_u32() != 0;
                        if point.address == RESTART_BIT && !on {
                            self.db.set_indicator(InternalIndicators::RESTART, false);
                            tracing::info!("Restart indication cleared");
                        } else {
                            *iin = iin.with(InternalIndicators::OUT_OF_RANGE);
                        }
                    }
                }
                (Group::TIME, 1) => {
                    while let Some(point) = request.next_value()? {
                        let mut raw = [0u8; 8];
                        let bytes = point.data.as_bytes();
                        let len = bytes.len().min(6);
                        raw[..len].copy_from_slice(&bytes[..len]);
                        let epoch_ms = u64::from_le_bytes(raw);
                        match chrono::DateTime::from_timestamp_millis(epoch_ms as i64) {
                            Some(time) => tracing::info!("Master set time to {}", time),
                            None => tracing::info!(epoch_ms, "Master set time"),
                        }
                        self.db
                            .set_indicator(InternalIndicators::TIME_SYNC_REQUIRED, false);
                    }
                }
                (group, variation) => {
                    tracing::debug!(group = group.0, variation, "Write rejected");
                    *iin = iin.with(InternalIndicators::OBJECT_UNKNOWN);
                }
            }
        }
        Ok(())
    }

    fn controls(request: &mut Message) -> Result<Vec<Control>, ProtocolError> {
        let mut controls = Vec::new();
        while let Some(object) = request.next_object()? {
            if object.group != Group::BINARY_OUTPUT_COMMAND {
                return Err(ProtocolError::UnknownObject {
                    group: object.group.0,
                    variation: object.variation,
                });
            }
            while let Some(point) = request.next_value()? {
                let index = u16::try_from(point.address).map_err(|_| {
                    ProtocolError::InvalidParam(format!("control index {}", point.address))
                })?;
                controls.push(Control {
                    variation: object.variation,
                    index,
                    crob: Crob::from_point(&point)?,
                });
            }
        }
        Ok(controls)
    }

    fn check(&self, control: &Control) -> u8 {
        if usize::from(control.index) < self.db.len(PointKind::BinaryOutput) {
            Crob::STATUS_SUCCESS
        } else {
            Crob::STATUS_NOT_SUPPORTED
        }
    }

    fn execute(&self, control: &Control) -> u8 {
        let status = self.check(control);
        if status != Crob::STATUS_SUCCESS {
            return status;
        }
        let latch = match control.crob.code {
            CrobCode::LatchOn | CrobCode::Close => Some(true),
            CrobCode::LatchOff | CrobCode::Trip => Some(false),
            CrobCode::PulseOn | CrobCode::PulseOff | CrobCode::Nul => None,
        };
        if let Some(on) = latch {
            if !self.db.set_binary_output(control.index, on) {
                return Crob::STATUS_NOT_SUPPORTED;
            }
        }
        tracing::info!(index = control.index, code = ?control.crob.code, "Control executed");
        Crob::STATUS_SUCCESS
    }

    fn select(
        &self,
        session: &mut Session,
        request: &mut Message,
        response: &mut Message,
    ) -> Result<(), ProtocolError> {
        let controls = Self::controls(request)?;
        let mut armed = Vec::with_capacity(controls.len());
        for control in &controls {
            let status = self.check(control);
            if status == Crob::STATUS_SUCCESS {
                armed.push((control.index, control.crob));
            }
            response.add_crob(control.variation, control.index, &control.crob.with_status(status))?;
        }
        tracing::debug!(session = %session.id, armed = armed.len(), "Controls selected");
        session.select(request.application_seq, armed);
        Ok(())
    }

    fn operate(
        &self,
        selection: Option<&Selection>,
        request: &mut Message,
        response: &mut Message,
    ) -> Result<(), ProtocolError> {
        let controls = Self::controls(request)?;
        let timeout = self.station.select_timeout();
        for control in &controls {
            let status = match selection {
                Some(sel) if sel.arms(request.application_seq, control.index, &control.crob) => {
                    if sel.is_expired(timeout) {
                        Crob::STATUS_TIMEOUT
                    } else {
                        self.execute(control)
                    }
                }
                _ => Crob::STATUS_NO_SELECT,
            };
            response.add_crob(control.variation, control.index, &control.crob.with_status(status))?;
        }
        Ok(())
    }

    fn direct_operate(
        &self,
        request: &mut Message,
        response: &mut Message,
    ) -> Result<(), ProtocolError> {
        for control in Self::controls(request)? {
            let status = self.execute(&control);
            response.add_crob(control.variation, control.index, &control.crob.with_status(status))?;
        }
        Ok(())
    }

    fn restart(&self, cold: bool, response: &mut Message) -> Result<(), ProtocolError> {
        if cold {
            tracing::info!("Cold restart requested");
            self.db.cold_restart();
            response.add_time_delay(COLD_RESTART_DELAY_MS)
        } else {
            tracing::info!("Warm restart requested");
            self.db.warm_restart();
            response.add_time_delay(WARM_RESTART_DELAY_MS)
        }
    }
}
