//! Info command handler.
//!
//! Shows drive identity, media geometry, and the recorded tape header
//! without starting a data session.

use crate::error::{Result, RustOnStreamError};
use crate::scsi::sense::SenseCondition;
use crate::scsi::{OnStreamDrive, SgDevice};
use crate::session::{read_tape_header, wait_for_ready, CancelToken};
use tracing::info;

pub async fn execute(device: String) -> Result<()> {
    info!("Querying drive information: {}", device);

    let cancel = CancelToken::new();
    super::spawn_cancel_handler(cancel.clone());

    tokio::task::spawn_blocking(move || -> Result<()> {
        let transport = SgDevice::open(&device)?;
        let mut drive = OnStreamDrive::new(transport);

        let identity = drive.identify()?;
        println!("Device:   {}", device);
        println!("Vendor:   {}", identity.vendor);
        println!("Product:  {}", identity.product);
        println!("Firmware: {} ({})", identity.revision, identity.firmware);

        // One probe decides whether a cartridge is loaded; unlike a data
        // session, info does not sit around waiting for one.
        drive.test_unit_ready()?;
        if drive.condition() == SenseCondition::NoMedium {
            println!("Medium:   not present");
            return Ok(());
        }
        wait_for_ready(&mut drive, false, &cancel)?;

        let parameters = drive.get_tape_parameters()?;
        println!(
            "Medium:   {} tracks x {} segments (density {:#04x})",
            parameters.tracks, parameters.segments_per_track, parameters.density
        );
        println!(
            "Capacity: {} frames ({} bytes)",
            parameters.total_frames(),
            parameters.capacity_bytes()
        );

        match read_tape_header(&mut drive, &cancel)? {
            Some(header) => {
                println!("Format:   ADR {}.{}", header.major, header.minor);
                println!("Pass:     {}", header.partition.write_pass_counter);
                println!(
                    "Data:     frames {}..{}",
                    header.partition.first_frame_address, header.partition.last_frame_address
                );
            }
            None => println!("Format:   blank or unrecognized"),
        }

        let position = drive.read_position()?;
        println!(
            "Position: host {} tape {} ({} frames buffered)",
            position.host_frame, position.tape_frame, position.buffered_frames
        );
        Ok(())
    })
    .await
    .map_err(|e| RustOnStreamError::tape_device(format!("info task failed: {}", e)))?
}
