//! Master station API.

use crate::connection::{ConnectionConfig, Link};
use crate::error::LinkError;
use dnpwire_protocol::{
    ControlCode, Crob, DataControl, Group, InternalIndicators, Message,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Polls and controls one outstation.
///
/// Each request is a fresh message on the master's outbound state, so
/// transport and application sequence numbers advance by one per request.
pub struct Master<S> {
    link: Link<S>,
    outbound: Message,
}

impl Master<TcpStream> {
    /// Connects to the outstation at `config.addr`.
    pub async fn connect(
        config: &ConnectionConfig,
        local: u16,
        remote: u16,
    ) -> Result<Self, LinkError> {
        let link = Link::connect(config).await?;
        Ok(Self::new(link, local, remote))
    }
}

impl<S> Master<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(link: Link<S>, local: u16, remote: u16) -> Self {
        let mut outbound = Message::request(remote, local, ControlCode::Read);
        outbound.data_control = DataControl::master();
        // The first new_message() brings both counters to zero.
        outbound.transport_seq = 0x3F;
        outbound.application_seq = 0x1F;
        Self { link, outbound }
    }

    pub fn local_address(&self) -> u16 {
        self.outbound.source
    }

    pub fn remote_address(&self) -> u16 {
        self.outbound.dest
    }

    pub fn link(&self) -> &Link<S> {
        &self.link
    }

    fn start(&mut self, control: ControlCode) -> &mut Message {
        self.outbound.new_message();
        self.outbound.control = control;
        &mut self.outbound
    }

    /// Sends the outbound message and waits for its response. Unsolicited
    /// messages that arrive in between are skipped.
    async fn exchange(&mut self) -> Result<Message, LinkError> {
        self.link.send(&mut self.outbound).await?;
        let seq = self.outbound.application_seq;

        loop {
            let response = self.link.receive().await?;
            match response.control {
                ControlCode::Unsolicited => {
                    tracing::debug!(source = response.source, "Skipping unsolicited message");
                    continue;
                }
                ControlCode::Response => {}
                other => {
                    return Err(LinkError::UnexpectedResponse(format!(
                        "control code {other:?}"
                    )))
                }
            }
            if response.application_seq != seq {
                return Err(LinkError::UnexpectedResponse(format!(
                    "sequence {} does not answer {}",
                    response.application_seq, seq
                )));
            }
            if response.source != self.outbound.dest {
                return Err(LinkError::UnexpectedResponse(format!(
                    "response from station {}",
                    response.source
                )));
            }
            return Ok(response);
        }
    }

    /// Reads one object, either `start..=stop` or every point.
    pub async fn read(
        &mut self,
        group: Group,
        variation: u8,
        range: Option<(u16, u16)>,
    ) -> Result<Message, LinkError> {
        self.start(ControlCode::Read)
            .add_read_request(group, variation, range)?;
        self.exchange().await
    }

    /// Polls the given data classes (0 = static data).
    pub async fn read_class(&mut self, classes: &[u8]) -> Result<Message, LinkError> {
        let msg = self.start(ControlCode::Read);
        for &class in classes {
            msg.add_class_request(class)?;
        }
        self.exchange().await
    }

    /// Reads a string device attribute.
    pub async fn read_attribute(&mut self, variation: u8) -> Result<Option<String>, LinkError> {
        self.start(ControlCode::Read)
            .add_device_attribute_request(variation)?;
        let mut response = self.exchange().await?;
        for (object, points) in response.decode_objects()? {
            if object.group != Group::DEVICE_ATTRIBUTE {
                continue;
            }
            if let Some(point) = points.first() {
                let bytes = point.data.as_bytes();
                if bytes.len() >= 2 {
                    return Ok(Some(String::from_utf8_lossy(&bytes[2..]).into_owned()));
                }
            }
        }
        Ok(None)
    }

    async fn command(
        &mut self,
        control: ControlCode,
        index: u16,
        crob: &Crob,
    ) -> Result<Crob, LinkError> {
        self.start(control).add_crob(1, index, crob)?;
        let mut response = self.exchange().await?;
        while let Some(object) = response.next_object()? {
            if object.group != Group::BINARY_OUTPUT_COMMAND {
                continue;
            }
            if let Some(point) = response.next_value()? {
                return Ok(Crob::from_point(&point)?);
            }
        }
        Err(LinkError::UnexpectedResponse(format!(
            "no relay output block echoed (indicators {:?})",
            response.indicators.names()
        )))
    }

    /// Arms a control. Returns the echoed block with its status.
    pub async fn select(&mut self, index: u16, crob: &Crob) -> Result<Crob, LinkError> {
        self.command(ControlCode::Select, index, crob).await
    }

    /// Executes a previously selected control.
    pub async fn operate(&mut self, index: u16, crob: &Crob) -> Result<Crob, LinkError> {
        self.command(ControlCode::Operate, index, crob).await
    }

    pub async fn direct_operate(&mut self, index: u16, crob: &Crob) -> Result<Crob, LinkError> {
        self.command(ControlCode::DirectOperate, index, crob).await
    }

    /// Select followed by operate; stops at a failed select.
    pub async fn select_before_operate(
        &mut self,
        index: u16,
        crob: &Crob,
    ) -> Result<Crob, LinkError> {
        let selected = self.select(index, crob).await?;
        if selected.status != Crob::STATUS_SUCCESS {
            return Ok(selected);
        }
        self.operate(index, crob).await
    }

    async fn restart(&mut self, control: ControlCode) -> Result<Option<u16>, LinkError> {
        self.start(control);
        let mut response = self.exchange().await?;
        while let Some(object) = response.next_object()? {
            if object.group == Group::TIME_DELAY {
                if let Some(point) = response.next_value()? {
                    return Ok(Some(point.data.as_u32() as u16));
                }
            }
        }
        Ok(None)
    }

    /// Restarts the outstation. Returns the advertised delay in milliseconds.
    pub async fn cold_restart(&mut self) -> Result<Option<u16>, LinkError> {
        self.restart(ControlCode::ColdRestart).await
    }

    pub async fn warm_restart(&mut self) -> Result<Option<u16>, LinkError> {
        self.restart(ControlCode::WarmRestart).await
    }

    /// Writes the outstation clock.
    pub async fn write_time(&mut self, epoch_ms: u64) -> Result<InternalIndicators, LinkError> {
        self.start(ControlCode::Write).add_time(epoch_ms)?;
        Ok(self.exchange().await?.indicators)
    }

    /// Clears the outstation's restart indication.
    pub async fn clear_restart(&mut self) -> Result<InternalIndicators, LinkError> {
        // Restart is bit 7 of the indications.
        self.start(ControlCode::Write).add_indication_clear(7)?;
        Ok(self.exchange().await?.indicators)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dnpwire_protocol::CrobCode;
    use tokio::io::{duplex, DuplexStream};

    /// Answers each request with `respond`, echoing its application sequence.
    fn spawn_outstation<F>(stream: DuplexStream, mut respond: F)
    where
        F: FnMut(&mut Message, &mut Message) + Send + 'static,
    {
        tokio::spawn(async move {
            let mut link = Link::new(stream);
            while let Ok(mut request) = link.receive().await {
                let mut response = Message::response_to(&request);
                respond(&mut request, &mut response);
                if link.send(&mut response).await.is_err() {
                    break;
                }
            }
        });
    }

    #[tokio::test]
    async fn test_read_class_round_trip() {
        let (a, b) = duplex(8192);
        spawn_outstation(b, |request, response| {
            assert_eq!(request.control, ControlCode::Read);
            let obj = request.next_object().unwrap().unwrap();
            assert_eq!(obj.group, Group::CLASS_OBJECTS);
            response
                .add_binary_states(Group::BINARY_INPUT, 1, 0, &[1, 0, 1], false)
                .unwrap();
        });

        let mut master = Master::new(Link::new(a), 1024, 1);
        let mut response = master.read_class(&[0]).await.unwrap();
        assert_eq!(response.application_seq, 0);
        let objects = response.decode_objects().unwrap();
        assert_eq!(objects[0].1.len(), 3);

        let response = master.read_class(&[1, 2, 3]).await.unwrap();
        assert_eq!(response.application_seq, 1);
        assert_eq!(response.transport_seq, 1);
    }

    #[tokio::test]
    async fn test_select_before_operate_echoes_block() {
        let (a, b) = duplex(8192);
        spawn_outstation(b, |request, response| {
            request.next_object().unwrap().unwrap();
            let point = request.next_value().unwrap().unwrap();
            let crob = Crob::from_point(&point).unwrap();
            response.add_crob(1, point.address as u16, &crob).unwrap();
        });

        let mut master = Master::new(Link::new(a), 1024, 1);
        let crob = Crob::new(CrobCode::LatchOn);
        let echoed = master.select_before_operate(2, &crob).await.unwrap();
        assert_eq!(echoed, crob);
    }

    #[tokio::test]
    async fn test_restart_reports_delay() {
        let (a, b) = duplex(8192);
        spawn_outstation(b, |_request, response| {
            response.add_time_delay(1500).unwrap();
        });

        let mut master = Master::new(Link::new(a), 1024, 1);
        assert_eq!(master.cold_restart().await.unwrap(), Some(1500));
    }

    #[tokio::test]
    async fn test_mismatched_sequence_is_rejected() {
        let (a, b) = duplex(8192);
        spawn_outstation(b, |_request, response| {
            response.application_seq = response.application_seq.wrapping_add(3);
        });

        let mut master = Master::new(Link::new(a), 1024, 1);
        let err = master.write_time(0).await.unwrap_err();
        assert!(matches!(err, LinkError::UnexpectedResponse(_)));
    }

    #[tokio::test]
    async fn test_missing_echo_is_unexpected() {
        let (a, b) = duplex(8192);
        spawn_outstation(b, |_request, response| {
            response.indicators = InternalIndicators::new().with(InternalIndicators::OBJECT_UNKNOWN);
        });

        let mut master = Master::new(Link::new(a), 1024, 1);
        let err = master
            .direct_operate(0, &Crob::new(CrobCode::Trip))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("object_unknown"));
    }

    #[tokio::test]
    async fn test_read_attribute() {
        let (a, b) = duplex(8192);
        spawn_outstation(b, |_request, response| {
            response.add_device_attribute_value(250, "outstation-7").unwrap();
        });

        let mut master = Master::new(Link::new(a), 1024, 1);
        let name = master.read_attribute(250).await.unwrap();
        assert_eq!(name.as_deref(), Some("outstation-7"));
    }
}
