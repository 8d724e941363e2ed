//! Device bring-up after a successful import
//!
//! Drives the fixed sequence of control transfers that enumerates a
//! CDC-ACM device and switches it into its serial configuration: device
//! descriptor, short then full configuration read, string descriptor,
//! SET_CONFIGURATION, SET_LINE_CODING and SET_CONTROL_LINE_STATE. Every
//! step must complete with status zero or the attachment is abandoned.

use protocol::{
    cdc_control, descriptors, CdcRequest, ConfigurationDescriptor, DescriptorType,
    DeviceDescriptor, LineCoding, ProtocolError, RetSubmit, SetupPacket, TypedDescriptor,
};
use std::time::Duration;
use tracing::debug;

use crate::error::{ClientError, Result};
use crate::session::DeviceConnection;
use crate::transport::Transport;

/// Budget for descriptor fetches; enumeration can be slow right after an
/// import
const DESCRIPTOR_TIMEOUT: Duration = Duration::from_secs(3);

/// Run the whole bring-up sequence on a freshly imported device.
pub(crate) fn run<T: Transport>(usb: &mut DeviceConnection<T>) -> Result<()> {
    let device = request_device_descriptor(usb)?;
    debug!(
        "device descriptor: vid {:#06x} pid {:#06x}",
        device.id_vendor, device.id_product
    );
    usb.set_device_descriptor(device);

    // the short configuration read tells us the total length to ask for
    let short = request_configuration(usb, ConfigurationDescriptor::SIZE as u16)?;
    let configuration = request_configuration(usb, short.total_length)?;
    let configuration_value = configuration.configuration_value;
    usb.bind_configuration(configuration);

    // fetched for completeness, the content is not used
    let _ = request_descriptor(
        usb,
        SetupPacket::get_descriptor(DescriptorType::String, 0, 0x00FF),
    )?;

    control_request(usb, SetupPacket::set_configuration(configuration_value), None)?;

    let coding = LineCoding::default();
    control_request(
        usb,
        SetupPacket::class_interface(CdcRequest::SetLineCoding, 0, LineCoding::SIZE as u16),
        Some(&coding.pack()),
    )?;

    control_request(
        usb,
        SetupPacket::class_interface(
            CdcRequest::SetControlLineState,
            (cdc_control::RTS | cdc_control::DTR) << 8,
            0,
        ),
        None,
    )?;

    Ok(())
}

fn request_device_descriptor<T: Transport>(
    usb: &mut DeviceConnection<T>,
) -> Result<DeviceDescriptor> {
    let setup = SetupPacket::get_descriptor(DescriptorType::Device, 0, DeviceDescriptor::SIZE as u16);
    match request_descriptor(usb, setup)? {
        TypedDescriptor::Device(device) => Ok(device),
        other => Err(ProtocolError::MalformedDescriptor(format!(
            "expected a device descriptor, got {other:?}"
        ))
        .into()),
    }
}

fn request_configuration<T: Transport>(
    usb: &mut DeviceConnection<T>,
    length: u16,
) -> Result<ConfigurationDescriptor> {
    let setup = SetupPacket::get_descriptor(DescriptorType::Configuration, 0, length);
    match request_descriptor(usb, setup)? {
        TypedDescriptor::Configuration(configuration) => Ok(configuration),
        other => Err(ProtocolError::MalformedDescriptor(format!(
            "expected a configuration descriptor, got {other:?}"
        ))
        .into()),
    }
}

/// Issue a GET_DESCRIPTOR and decode the returned payload.
fn request_descriptor<T: Transport>(
    usb: &mut DeviceConnection<T>,
    setup: SetupPacket,
) -> Result<TypedDescriptor> {
    usb.send_setup(setup, None)?;
    let prefix = read_ack(usb, DESCRIPTOR_TIMEOUT)?;
    let data = usb.readall(prefix.actual_length.max(0) as usize, DESCRIPTOR_TIMEOUT)?;
    debug!("descriptor payload: {} bytes", data.len());
    Ok(descriptors::parse(&data)?)
}

/// Issue a control transfer that carries no descriptor back.
fn control_request<T: Transport>(
    usb: &mut DeviceConnection<T>,
    setup: SetupPacket,
    data: Option<&[u8]>,
) -> Result<()> {
    usb.send_setup(setup, data)?;
    read_ack(usb, DESCRIPTOR_TIMEOUT)?;
    Ok(())
}

/// Read the RET_SUBMIT for the setup just sent; a nonzero status aborts
/// the attachment.
fn read_ack<T: Transport>(usb: &mut DeviceConnection<T>, timeout: Duration) -> Result<RetSubmit> {
    let prefix_data = usb.readall(RetSubmit::SIZE, timeout)?;
    if prefix_data.is_empty() {
        return Err(
            ClientError::lost("connection lost while completing device setup".to_string())
                .with_link(usb.link()),
        );
    }
    let prefix = RetSubmit::from_bytes(&prefix_data)?;
    if prefix.status != 0 {
        return Err(ClientError::Attach {
            errno: prefix.status.abs(),
        });
    }
    Ok(prefix)
}
