//! SDP (Session Description Protocol) generation (RFC 4566 / RFC 8866).
//!
//! Produces the SDP body returned by DESCRIBE responses, one `m=` section
//! per payloader of the mount's pipeline:
//!
//! ```text
//! v=0
//! o=- <sess-id> 1 IN IP4 <addr>
//! s=Session streamed with screencast-rtsp
//! c=IN IP4 <addr>
//! t=0 0
//! a=tool:screencast-rtsp
//! a=type:broadcast
//! a=control:*
//! a=range:npt=now-
//! m=video 0 RTP/AVP 96
//! a=rtpmap:96 H264/90000
//! a=fmtp:96 packetization-mode=1
//! a=control:stream=0
//! m=audio 0 RTP/AVP 98
//! a=rtpmap:98 MP4A-LATM/48000/2
//! a=control:stream=1
//! ```

use crate::pipeline::{AUDIO_CHANNELS, Encoding, PipelineDescription};

const TOOL: &str = "screencast-rtsp";

/// Generate the session description of a mount's shared media.
///
/// `session_id` is the origin id of the shared media; it stays the same for
/// every client as long as the media lives.
pub fn generate_sdp(description: &PipelineDescription, host: &str, session_id: u64) -> String {
    let mut sdp: Vec<String> = vec![
        "v=0".to_string(),
        format!("o=- {session_id} 1 IN IP4 {host}"),
        format!("s=Session streamed with {TOOL}"),
        format!("c=IN IP4 {host}"),
        "t=0 0".to_string(),
        format!("a=tool:{TOOL}"),
        "a=type:broadcast".to_string(),
        "a=control:*".to_string(),
        "a=range:npt=now-".to_string(),
    ];

    for pay in description.payloaders() {
        let pt = pay.payload_type;
        let encoding = pay.encoding;
        match encoding {
            Encoding::H264 => {
                sdp.push(format!("m=video 0 RTP/AVP {pt}"));
                sdp.push(format!(
                    "a=rtpmap:{pt} {}/{}",
                    encoding.rtpmap_name(),
                    encoding.clock_rate()
                ));
                sdp.push(format!("a=fmtp:{pt} packetization-mode=1"));
            }
            Encoding::Mp4aLatm => {
                sdp.push(format!("m=audio 0 RTP/AVP {pt}"));
                sdp.push(format!(
                    "a=rtpmap:{pt} {}/{}/{AUDIO_CHANNELS}",
                    encoding.rtpmap_name(),
                    encoding.clock_rate()
                ));
            }
        }
        sdp.push(format!("a=control:stream={}", pay.stream));
    }

    tracing::trace!("SDP: {}", sdp.join("\r\n"));

    format!("{}\r\n", sdp.join("\r\n"))
}
