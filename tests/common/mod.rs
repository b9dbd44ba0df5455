#![allow(dead_code)]

use dash_ts_validator::constants::PAT_PID;
use dash_ts_validator::pes::{PesHeader, PesOptionalHeader, write_pes_packet};
use dash_ts_validator::psi::{ElementaryStreamInfo, PatEntry, PatSection, PmtSection};
use dash_ts_validator::ts::{AdaptationField, Pcr, TsHeader, TsPacket};
use dash_ts_validator::types::SegmentType;
use dash_ts_validator::{Diagnostics, Validator};

pub const PMT_PID: u16 = 0x1000;
pub const VIDEO_PID: u16 = 0x100;
pub const AUDIO_PID: u16 = 0x101;

pub const SPS: &[u8] = &[0x67, 0x42, 0xC0, 0x1E];
pub const PPS: &[u8] = &[0x68, 0xCE, 0x3C, 0x80];
/// first_mb 0, slice_type 7 (I), pps 0
pub const IDR_HEADER: &[u8] = &[0x65, 0x88, 0x80];
/// first_mb 0, slice_type 5 (P), pps 0
pub const NON_IDR_HEADER: &[u8] = &[0x41, 0x9A, 0x80];

pub fn aud(primary_pic_type: u8) -> Vec<u8> {
    vec![0x09, (primary_pic_type << 5) | 0x10]
}

/// Annex B byte stream from NAL units, 4-byte start codes.
pub fn annex_b(nals: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::new();
    for nal in nals {
        out.extend_from_slice(&[0, 0, 0, 1]);
        out.extend_from_slice(nal);
    }
    out
}

fn with_filler(header: &[u8], filler: usize) -> Vec<u8> {
    let mut nal = header.to_vec();
    nal.resize(header.len() + filler, 0xAA);
    nal
}

/// AUD (I) + SPS + PPS + IDR slice.
pub fn idr_access_unit(filler: usize) -> Vec<u8> {
    annex_b(&[&aud(0)[..], SPS, PPS, &with_filler(IDR_HEADER, filler)[..]])
}

/// AUD (I/P) + non-IDR slice.
pub fn p_access_unit(filler: usize) -> Vec<u8> {
    annex_b(&[&aud(1)[..], &with_filler(NON_IDR_HEADER, filler)[..]])
}

pub fn ts(pid: u16, pusi: bool, pcr: Option<u64>, payload: &[u8]) -> Vec<u8> {
    TsPacket {
        header: TsHeader {
            payload_unit_start_indicator: pusi,
            pid,
            ..Default::default()
        },
        adaptation_field: pcr.map(|base| AdaptationField {
            random_access_indicator: true,
            pcr: Some(Pcr { base, extension: 0 }),
            ..Default::default()
        }),
        payload: Some(payload),
    }
    .write()
    .unwrap()
}

fn psi(pid: u16, section: Vec<u8>) -> Vec<u8> {
    let mut payload = vec![0u8];
    payload.extend(section);
    payload.resize(184, 0xFF);
    ts(pid, true, None, &payload)
}

pub fn pat_packet(programs: &[(u16, u16)]) -> Vec<u8> {
    let section = PatSection {
        private_indicator: false,
        transport_stream_id: 1,
        version_number: 0,
        current_next_indicator: true,
        programs: programs
            .iter()
            .map(|&(program_number, pid)| PatEntry { program_number, pid })
            .collect(),
        crc_32: 0,
    };
    psi(PAT_PID, section.write().unwrap())
}

pub fn pmt_packet(streams: &[(u8, u16)]) -> Vec<u8> {
    let section = PmtSection {
        private_indicator: false,
        program_number: 1,
        version_number: 0,
        current_next_indicator: true,
        pcr_pid: VIDEO_PID,
        descriptors: vec![],
        es_info: streams
            .iter()
            .map(|&(stream_type, elementary_pid)| ElementaryStreamInfo {
                stream_type,
                elementary_pid,
                descriptors: vec![],
            })
            .collect(),
        crc_32: 0,
    };
    psi(PMT_PID, section.write().unwrap())
}

/// One PES packet split over as many TS packets as needed. The PCR, if
/// any, rides in the adaptation field of the first one.
pub fn pes_packets(pts: u64, pcr: Option<u64>, es: &[u8], bounded: bool) -> Vec<Vec<u8>> {
    let mut header = PesHeader {
        stream_id: 0xE0,
        pes_packet_length: 0,
        optional: Some(PesOptionalHeader {
            data_alignment_indicator: true,
            pts: Some(pts),
            ..Default::default()
        }),
    };
    header.trim(es.len());
    if !bounded {
        header.pes_packet_length = 0;
    }
    let pes = write_pes_packet(&header, es).unwrap();

    let first_len = (if pcr.is_some() { 176 } else { 184 }).min(pes.len());
    let mut packets = vec![ts(VIDEO_PID, true, pcr, &pes[..first_len])];
    for chunk in pes[first_len..].chunks(184) {
        packets.push(ts(VIDEO_PID, false, None, chunk));
    }
    packets
}

pub fn concat(packets: &[Vec<u8>]) -> Vec<u8> {
    packets.concat()
}

/// PAT + PMT with one AVC stream.
pub fn avc_preamble() -> Vec<Vec<u8>> {
    vec![
        pat_packet(&[(1, PMT_PID)]),
        pmt_packet(&[(0x1B, VIDEO_PID)]),
    ]
}

/// Two access units, IDR first, with the PCR ahead of the IDR.
pub fn conformant_segment(bounded: bool) -> Vec<u8> {
    let mut packets = avc_preamble();
    packets.extend(pes_packets(0, Some(0), &idr_access_unit(1000), bounded));
    packets.extend(pes_packets(3003, None, &p_access_unit(400), bounded));
    concat(&packets)
}

pub fn validate(segment_type: SegmentType, data: &[u8]) -> Diagnostics {
    let mut validator = Validator::new(segment_type);
    for packet in data.chunks(188) {
        if validator.feed(packet).is_err() {
            break;
        }
    }
    validator.finish()
}

/// Scratch file under the system temp dir, unique per test.
pub fn temp_segment(name: &str, data: &[u8]) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!(
        "dash_ts_validator_{}_{name}.ts",
        std::process::id()
    ));
    std::fs::write(&path, data).unwrap();
    path
}
