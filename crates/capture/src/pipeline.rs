//! GStreamer capture devices.
//!
//! A camera pipeline and a microphone pipeline each end in an `appsink`.
//! Buffers pulled from the sinks are forwarded into the session's media
//! channel with `try_send`, so a session that falls behind loses buffers
//! instead of queueing them.

use std::sync::OnceLock;

use gst::prelude::*;
use gstreamer as gst;
use montage_common::{CaptureDefaults, MontageError, MontageResult};
use montage_model::MediaTime;
use tokio::sync::mpsc;

use crate::device::{CaptureDevice, CaptureOutputs, DeviceFactory};
use crate::event::{
    AudioChunk, CameraPosition, CaptureEvent, Mirroring, SampleBuffer, VideoFrame,
};

const NANOS: u32 = 1_000_000_000;
const EOS_TIMEOUT_SECS: u64 = 5;

/// Camera and microphone parameters for GStreamer devices.
#[derive(Debug, Clone)]
pub struct GstDeviceFactory {
    pub front_device: String,
    pub back_device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub sample_rate: u32,
    pub channels: u16,
}

impl From<&CaptureDefaults> for GstDeviceFactory {
    fn from(defaults: &CaptureDefaults) -> Self {
        Self {
            front_device: defaults.video_device_front.clone(),
            back_device: defaults.video_device_back.clone(),
            width: defaults.width,
            height: defaults.height,
            fps: defaults.fps.max(1),
            sample_rate: defaults.sample_rate,
            channels: defaults.channels.max(1),
        }
    }
}

impl GstDeviceFactory {
    fn device_node(&self, position: CameraPosition) -> &str {
        match position {
            CameraPosition::Back => &self.back_device,
            CameraPosition::Front | CameraPosition::Unspecified => &self.front_device,
        }
    }
}

impl DeviceFactory for GstDeviceFactory {
    fn open(
        &self,
        position: CameraPosition,
        mirroring: Mirroring,
    ) -> MontageResult<Box<dyn CaptureDevice>> {
        init_gstreamer()?;
        Ok(Box::new(GstCaptureDevice {
            settings: self.clone(),
            position,
            mirroring,
            camera: None,
            microphone: None,
            outputs: None,
        }))
    }
}

/// Launch line for a camera pipeline producing RGBA frames.
pub(crate) fn camera_launch(
    device: &str,
    settings: &GstDeviceFactory,
    mirroring: Mirroring,
) -> String {
    let flip = if mirroring.video_mirrored {
        " ! videoflip method=horizontal-flip"
    } else {
        ""
    };
    format!(
        "v4l2src device=\"{}\" do-timestamp=true ! videoconvert ! videoscale ! videorate{flip} ! video/x-raw,format=RGBA,width={},height={},framerate={}/1 ! appsink name=sink emit-signals=true sync=false max-buffers=2 drop=true",
        escape(device),
        settings.width,
        settings.height,
        settings.fps
    )
}

/// Launch line for a microphone pipeline producing interleaved S16LE.
pub(crate) fn microphone_launch(settings: &GstDeviceFactory) -> String {
    format!(
        "autoaudiosrc ! audioconvert ! audioresample ! audio/x-raw,format=S16LE,layout=interleaved,rate={},channels={} ! appsink name=sink emit-signals=true sync=false max-buffers=8 drop=true",
        settings.sample_rate, settings.channels
    )
}

/// A v4l2 camera plus the default microphone.
pub struct GstCaptureDevice {
    settings: GstDeviceFactory,
    position: CameraPosition,
    mirroring: Mirroring,
    camera: Option<gst::Pipeline>,
    microphone: Option<gst::Pipeline>,
    outputs: Option<CaptureOutputs>,
}

impl GstCaptureDevice {
    fn start_camera(&mut self, media: mpsc::Sender<CaptureEvent>) -> MontageResult<()> {
        let launch = camera_launch(
            self.settings.device_node(self.position),
            &self.settings,
            self.mirroring,
        );
        let pipeline = build_pipeline("camera", &launch)?;
        let frame_duration = MediaTime::new(1, self.settings.fps);
        let (width, height) = (self.settings.width, self.settings.height);

        connect_sink(&pipeline, move |pts, data| {
            let frame = VideoFrame {
                width,
                height,
                data: data.to_vec(),
            };
            let event = CaptureEvent::Sample(SampleBuffer::video(pts, frame_duration, frame));
            if media.try_send(event).is_err() {
                tracing::trace!("Media channel full, camera frame dropped");
            }
        })?;
        set_playing("camera", &pipeline)?;
        self.camera = Some(pipeline);
        Ok(())
    }

    fn start_microphone(&mut self, media: mpsc::Sender<CaptureEvent>) -> MontageResult<()> {
        let pipeline = build_pipeline("microphone", &microphone_launch(&self.settings))?;
        let (sample_rate, channels) = (self.settings.sample_rate, self.settings.channels);

        connect_sink(&pipeline, move |pts, data| {
            let samples = data
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]))
                .collect();
            let chunk = AudioChunk {
                sample_rate,
                channels,
                samples,
            };
            let event = CaptureEvent::Sample(SampleBuffer::audio(pts, chunk));
            if media.try_send(event).is_err() {
                tracing::trace!("Media channel full, audio chunk dropped");
            }
        })?;
        set_playing("microphone", &pipeline)?;
        self.microphone = Some(pipeline);
        Ok(())
    }
}

impl CaptureDevice for GstCaptureDevice {
    fn start(&mut self, outputs: CaptureOutputs) -> MontageResult<()> {
        if self.camera.is_some() {
            return Err(MontageError::capture("capture device already started"));
        }
        self.start_camera(outputs.media.clone())?;
        if let Err(e) = self.start_microphone(outputs.media.clone()) {
            let _ = self.stop();
            return Err(e);
        }
        self.outputs = Some(outputs);
        tracing::info!(position = ?self.position, "Capture device started");
        Ok(())
    }

    fn stop(&mut self) -> MontageResult<()> {
        let mut result = Ok(());
        let pipelines = [
            ("camera", self.camera.take()),
            ("microphone", self.microphone.take()),
        ];
        for (name, pipeline) in pipelines {
            if let Some(pipeline) = pipeline {
                if let Err(e) = stop_pipeline(name, &pipeline) {
                    result = Err(e);
                }
            }
        }
        result
    }

    fn switch_camera(
        &mut self,
        position: CameraPosition,
        mirroring: Mirroring,
    ) -> MontageResult<()> {
        self.position = position;
        self.mirroring = mirroring;
        let Some(outputs) = self.outputs.clone() else {
            return Ok(());
        };
        if let Some(camera) = self.camera.take() {
            stop_pipeline("camera", &camera)?;
        }
        self.start_camera(outputs.media)
    }

    fn is_running(&self) -> bool {
        self.camera.is_some()
    }
}

impl Drop for GstCaptureDevice {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn build_pipeline(name: &str, launch: &str) -> MontageResult<gst::Pipeline> {
    let element = gst::parse::launch(launch)
        .map_err(|e| MontageError::capture(format!("Failed to build {name} pipeline: {e}")))?;
    element
        .dynamic_cast::<gst::Pipeline>()
        .map_err(|_| MontageError::capture("Launch string did not produce a pipeline"))
}

/// Forward every buffer reaching the pipeline's `sink` to `deliver`.
fn connect_sink<F>(pipeline: &gst::Pipeline, deliver: F) -> MontageResult<()>
where
    F: Fn(MediaTime, &[u8]) + Send + Sync + 'static,
{
    let sink = pipeline
        .by_name("sink")
        .ok_or_else(|| MontageError::capture("pipeline has no appsink"))?;
    sink.connect("new-sample", false, move |values| {
        let flow = match pull_sample(values) {
            Some(sample) => {
                if let Some(buffer) = sample.buffer() {
                    let pts = buffer
                        .pts()
                        .map(|t| MediaTime::new(t.nseconds() as i64, NANOS))
                        .unwrap_or(MediaTime::ZERO);
                    match buffer.map_readable() {
                        Ok(map) => deliver(pts, map.as_slice()),
                        Err(_) => tracing::warn!("Unreadable capture buffer"),
                    }
                }
                gst::FlowReturn::Ok
            }
            None => gst::FlowReturn::Eos,
        };
        Some(flow.to_value())
    });
    Ok(())
}

fn pull_sample(values: &[gst::glib::Value]) -> Option<gst::Sample> {
    let sink = values.first()?.get::<gst::Element>().ok()?;
    sink.emit_by_name::<Option<gst::Sample>>("pull-sample", &[])
}

fn set_playing(name: &str, pipeline: &gst::Pipeline) -> MontageResult<()> {
    pipeline
        .set_state(gst::State::Playing)
        .map_err(|e| MontageError::capture(format!("Failed to start {name} pipeline: {e:?}")))?;
    match pipeline.state(gst::ClockTime::from_seconds(10)) {
        (Ok(_), gst::State::Playing, _) => Ok(()),
        (Ok(_), state, _) => {
            tracing::warn!(
                pipeline = name,
                ?state,
                "Pipeline did not reach Playing within timeout"
            );
            Ok(())
        }
        (Err(e), _, _) => Err(MontageError::capture(format!(
            "{name} pipeline failed to reach Playing state: {e:?}"
        ))),
    }
}

/// Send EOS, wait for it to drain, then shut the pipeline down.
fn stop_pipeline(name: &str, pipeline: &gst::Pipeline) -> MontageResult<()> {
    if pipeline.send_event(gst::event::Eos::new()) {
        if let Some(bus) = pipeline.bus() {
            let drained = bus.timed_pop_filtered(
                gst::ClockTime::from_seconds(EOS_TIMEOUT_SECS),
                &[gst::MessageType::Eos, gst::MessageType::Error],
            );
            match drained {
                Some(msg) => {
                    if let gst::MessageView::Error(e) = msg.view() {
                        tracing::warn!(
                            pipeline = name,
                            error = %e.error(),
                            "Pipeline error during EOS drain"
                        );
                    }
                }
                None => tracing::warn!(pipeline = name, "EOS drain timed out"),
            }
        }
    } else {
        tracing::warn!(pipeline = name, "Failed to send EOS event");
    }

    pipeline
        .set_state(gst::State::Null)
        .map_err(|e| MontageError::capture(format!("Failed to stop {name} pipeline: {e:?}")))?;
    Ok(())
}

fn init_gstreamer() -> MontageResult<()> {
    static GST_INIT: OnceLock<Result<(), String>> = OnceLock::new();
    match GST_INIT.get_or_init(|| gst::init().map_err(|e| e.to_string())) {
        Ok(()) => Ok(()),
        Err(e) => Err(MontageError::capture(format!(
            "Failed to initialize GStreamer: {e}"
        ))),
    }
}

fn escape(value: &str) -> String {
    value.replace('"', "\\\"")
}
