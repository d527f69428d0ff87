//! # Payload Decoding
//!
//! Turns the payload of a validated [`RawPacket`] into a typed
//! [`PacketBody`] using `nom` parser combinators. All multi-byte fields are
//! little-endian; curve records are converted to physical units here so the
//! reassembler only ever sees litres, litres per second and seconds.

use crate::constants::*;
use crate::error::ProtocolError;
use crate::packet::codec::RawPacket;
use crate::packet::tag::PacketTag;
use crate::session::curve::{FlowVolumePoint, OximetrySample, VolumeTimePoint};
use crate::session::types::{FieldId, Scalar};
use nom::combinator::{all_consuming, eof, opt};
use nom::multi::many0;
use nom::number::complete::{i8 as parse_i8, le_i16, le_u16, le_u32, u8 as parse_u8};
use nom::sequence::tuple;
use nom::IResult;

/// Side-channel packets that never feed a session.
#[derive(Debug, Clone, PartialEq)]
pub enum Housekeeping {
    DeviceOn {
        firmware: Option<(u8, u8)>,
        battery_pct: Option<u8>,
    },
    Temperature {
        celsius: f32,
    },
    Battery {
        level_pct: u8,
    },
}

/// Live oximetry values shown while the finger is on the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OximetryRealtime {
    pub spo2_pct: u8,
    pub heart_rate_bpm: u8,
    pub signal: u8,
    pub finger_on: bool,
    pub searching_pulse: bool,
    pub data_valid: bool,
    pub battery_low: bool,
}

/// Typed packet contents.
#[derive(Debug, Clone, PartialEq)]
pub enum PacketBody {
    FlowVolume(Vec<FlowVolumePoint>),
    VolumeTime(Vec<VolumeTimePoint>),
    OximetryCurve(Vec<OximetrySample>),
    OximetryRealtime(OximetryRealtime),
    HighResHeader { expected_samples: u16 },
    HighResFlows { start_index: u16, flows_ls: Vec<f32> },
    Fields(Vec<(FieldId, Scalar)>),
    Terminal { declared_samples: Option<u16> },
    Housekeeping(Housekeeping),
    FirmwareProgress(u8),
    FirmwareComplete,
    FirmwareError(u8),
    CommandEcho,
}

/// Decodes the payload of `packet` according to its tag.
pub fn parse_body(packet: &RawPacket) -> Result<PacketBody, ProtocolError> {
    let tag = packet.tag();
    let input = packet.payload();

    let result: IResult<&[u8], PacketBody> = match tag {
        PacketTag::Fvc => all_consuming(many0(flow_volume_point))(input)
            .map(|(rest, points)| (rest, PacketBody::FlowVolume(points))),
        PacketTag::Vc | PacketTag::Mvv | PacketTag::SpiroLastRtVt => {
            all_consuming(many0(volume_time_point))(input)
                .map(|(rest, points)| (rest, PacketBody::VolumeTime(points)))
        }
        PacketTag::OxyResultsCurve => all_consuming(many0(oximetry_sample))(input)
            .map(|(rest, samples)| (rest, PacketBody::OximetryCurve(samples))),
        PacketTag::Oxy => all_consuming(oximetry_realtime)(input),
        PacketTag::Curve10ms => all_consuming(le_u16)(input).map(|(rest, expected_samples)| {
            (rest, PacketBody::HighResHeader { expected_samples })
        }),
        PacketTag::Curve10msFlows => all_consuming(high_res_flows)(input),
        PacketTag::FvcLastRt
        | PacketTag::VcLastRt
        | PacketTag::MvvLastRt
        | PacketTag::OxyResults => all_consuming(opt(le_u16))(input)
            .map(|(rest, declared_samples)| (rest, PacketBody::Terminal { declared_samples })),
        PacketTag::InfoFvcLastRt1 => all_consuming(info_fvc_last_rt)(input),
        PacketTag::FvcLastRt2P1 => fields_u16(
            input,
            &[FieldId::Pef, FieldId::Fev1, FieldId::Fvc],
        ),
        PacketTag::FvcLastRt2P2 => fields_u16(
            input,
            &[FieldId::Fev1FvcRatio, FieldId::Fev6, FieldId::Fef2575],
        ),
        PacketTag::FvcLastRt2P3 => fields_u16(
            input,
            &[
                FieldId::ExtrapolatedVolume,
                FieldId::PefTime,
                FieldId::ForcedExpirationTime,
            ],
        ),
        PacketTag::FvcLastRt2P4 => fields_u16(
            input,
            &[FieldId::Fivc, FieldId::HesitationTime, FieldId::InspirationTime],
        ),
        PacketTag::FvcLastRt2P5 => all_consuming(tuple((parse_u8, parse_u8)))(input).map(
            |(rest, (flags, quality))| {
                (
                    rest,
                    PacketBody::Fields(vec![
                        (FieldId::DeviceFlags, flags as Scalar),
                        (FieldId::DeviceQualityCode, quality as Scalar),
                    ]),
                )
            },
        ),
        PacketTag::FvcLastRt2P6 => fields_u16(input, &[FieldId::Fev05, FieldId::Fev075]),
        PacketTag::VcLastRtP1 => all_consuming(vc_part_one)(input),
        PacketTag::VcLastRtP2 => fields_u16(
            input,
            &[FieldId::Irv, FieldId::Erv, FieldId::Tv, FieldId::Mv],
        ),
        PacketTag::VcLastRtP3 => fields_u16(
            input,
            &[
                FieldId::Rr,
                FieldId::Ti,
                FieldId::Te,
                FieldId::TvTi,
                FieldId::TiTtot,
                FieldId::Sit,
                FieldId::Set,
            ],
        ),
        PacketTag::MvvLastRtP1 => all_consuming(tuple((parse_i8, le_u16)))(input).map(
            |(rest, (ats, mvv))| {
                (
                    rest,
                    PacketBody::Fields(vec![
                        (FieldId::AtsStandard, ats as Scalar),
                        (FieldId::Mvv, mvv as Scalar),
                    ]),
                )
            },
        ),
        PacketTag::OxyResultsBase => all_consuming(oxy_results_base)(input),
        PacketTag::OxyResultsBase2 => all_consuming(oxy_results_base2)(input),
        PacketTag::Calibration => all_consuming(tuple((le_i16, le_i16)))(input).map(
            |(rest, (expiratory, inspiratory))| {
                (
                    rest,
                    PacketBody::Fields(vec![
                        (FieldId::CalibrationExpiratory, expiratory as Scalar),
                        (FieldId::CalibrationInspiratory, inspiratory as Scalar),
                    ]),
                )
            },
        ),
        PacketTag::TxCalibration | PacketTag::TxSettingDate | PacketTag::Erase => {
            Ok((&input[input.len()..], PacketBody::CommandEcho))
        }
        PacketTag::On => all_consuming(device_on)(input),
        PacketTag::Temperature => all_consuming(le_i16)(input).map(|(rest, raw)| {
            (
                rest,
                PacketBody::Housekeeping(Housekeeping::Temperature {
                    celsius: raw as f32 / 10.0,
                }),
            )
        }),
        PacketTag::Battery => all_consuming(parse_u8)(input).map(|(rest, level_pct)| {
            (
                rest,
                PacketBody::Housekeeping(Housekeeping::Battery { level_pct }),
            )
        }),
        PacketTag::FirmwareProgress => all_consuming(parse_u8)(input)
            .map(|(rest, percent)| (rest, PacketBody::FirmwareProgress(percent))),
        PacketTag::FirmwareComplete => Ok((&input[input.len()..], PacketBody::FirmwareComplete)),
        PacketTag::FirmwareError => all_consuming(opt(parse_u8))(input)
            .map(|(rest, code)| (rest, PacketBody::FirmwareError(code.unwrap_or(0)))),
    };

    match result {
        Ok((_, body)) => Ok(body),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            Err(ProtocolError::MalformedPayload {
                tag,
                reason: format!(
                    "{:?} at offset {} of {}",
                    e.code,
                    input.len() - e.input.len(),
                    input.len()
                ),
            })
        }
        Err(nom::Err::Incomplete(_)) => Err(ProtocolError::MalformedPayload {
            tag,
            reason: format!("incomplete payload of {} bytes", input.len()),
        }),
    }
}

/// Reads consecutive u16 fields, one per id, and requires the exact length.
fn fields_u16<'a>(input: &'a [u8], ids: &[FieldId]) -> IResult<&'a [u8], PacketBody> {
    let mut rest = input;
    let mut fields = Vec::with_capacity(ids.len());
    for id in ids {
        let (next, value) = le_u16(rest)?;
        fields.push((*id, value as Scalar));
        rest = next;
    }
    let (rest, _) = eof(rest)?;
    Ok((rest, PacketBody::Fields(fields)))
}

fn flow_volume_point(input: &[u8]) -> IResult<&[u8], FlowVolumePoint> {
    let (input, (volume_ml, flow_cls, time_ms)) = tuple((le_i16, le_i16, le_u16))(input)?;
    Ok((
        input,
        FlowVolumePoint {
            volume_l: volume_ml as f32 / 1000.0,
            flow_ls: flow_cls as f32 / 100.0,
            time_s: time_ms as f32 / 1000.0,
        },
    ))
}

fn volume_time_point(input: &[u8]) -> IResult<&[u8], VolumeTimePoint> {
    let (input, (volume_ml, time_ms)) = tuple((le_i16, le_u16))(input)?;
    Ok((
        input,
        VolumeTimePoint {
            volume_l: volume_ml as f32 / 1000.0,
            time_s: time_ms as f32 / 1000.0,
        },
    ))
}

fn oximetry_sample(input: &[u8]) -> IResult<&[u8], OximetrySample> {
    let (input, (spo2_pct, heart_rate_bpm)) = tuple((parse_u8, parse_u8))(input)?;
    Ok((
        input,
        OximetrySample {
            heart_rate_bpm,
            spo2_pct,
        },
    ))
}

fn oximetry_realtime(input: &[u8]) -> IResult<&[u8], PacketBody> {
    let (input, (spo2_pct, heart_rate_bpm, signal, flags)) =
        tuple((parse_u8, parse_u8, parse_u8, parse_u8))(input)?;
    Ok((
        input,
        PacketBody::OximetryRealtime(OximetryRealtime {
            spo2_pct,
            heart_rate_bpm,
            signal,
            finger_on: flags & OXY_FLAG_FINGER_ON != 0,
            searching_pulse: flags & OXY_FLAG_SEARCHING_PULSE != 0,
            data_valid: flags & OXY_FLAG_DATA_VALID != 0,
            battery_low: flags & OXY_FLAG_BATTERY_LOW != 0,
        }),
    ))
}

fn high_res_flows(input: &[u8]) -> IResult<&[u8], PacketBody> {
    let (input, start_index) = le_u16(input)?;
    let (input, raw) = many0(le_i16)(input)?;
    Ok((
        input,
        PacketBody::HighResFlows {
            start_index,
            flows_ls: raw.into_iter().map(|f| f as f32 / 100.0).collect(),
        },
    ))
}

fn info_fvc_last_rt(input: &[u8]) -> IResult<&[u8], PacketBody> {
    let (input, (ats, eofe)) = tuple((parse_i8, parse_u8))(input)?;
    let mut fields = vec![(FieldId::AtsStandard, ats as Scalar)];
    if eofe <= 1 {
        fields.push((FieldId::EndOfForcedExpiration, eofe as Scalar));
    }
    Ok((input, PacketBody::Fields(fields)))
}

fn vc_part_one(input: &[u8]) -> IResult<&[u8], PacketBody> {
    let (input, (ats, evc, ivc, ic, time_ms, quality)) =
        tuple((parse_i8, le_u16, le_u16, le_u16, le_u16, parse_u8))(input)?;
    Ok((
        input,
        PacketBody::Fields(vec![
            (FieldId::AtsStandard, ats as Scalar),
            (FieldId::Evc, evc as Scalar),
            (FieldId::Ivc, ivc as Scalar),
            (FieldId::Ic, ic as Scalar),
            (FieldId::SlowExpInsTime, time_ms as Scalar),
            (FieldId::VcQualityCode, quality as Scalar),
        ]),
    ))
}

fn oxy_results_base(input: &[u8]) -> IResult<&[u8], PacketBody> {
    let (input, (spo2, bpm, recording, analysis)) =
        tuple((parse_u8, parse_u8, le_u32, le_u32))(input)?;
    let (input, (below_89, tachy, brady)) = tuple((le_u16, le_u16, le_u16))(input)?;
    Ok((
        input,
        PacketBody::Fields(vec![
            (FieldId::Spo2Baseline, spo2 as Scalar),
            (FieldId::BpmBaseline, bpm as Scalar),
            (FieldId::RecordingTime, recording as Scalar),
            (FieldId::AnalysisTime, analysis as Scalar),
            (FieldId::EventsSpo2Below89, below_89 as Scalar),
            (FieldId::TachycardiaEvents, tachy as Scalar),
            (FieldId::BradycardiaEvents, brady as Scalar),
        ]),
    ))
}

fn oxy_results_base2(input: &[u8]) -> IResult<&[u8], PacketBody> {
    let ids = [
        FieldId::T90,
        FieldId::T89,
        FieldId::T88,
        FieldId::T87,
        FieldId::T5,
        FieldId::T40,
        FieldId::T120,
    ];
    let mut rest = input;
    let mut fields = Vec::with_capacity(ids.len() + 2);
    for id in ids {
        let (next, seconds) = le_u32(rest)?;
        fields.push((id, seconds as Scalar));
        rest = next;
    }
    let (rest, (delta, afib)) = tuple((le_u16, parse_u8))(rest)?;
    fields.push((FieldId::DeltaIndex12s, delta as Scalar));
    fields.push((FieldId::AtrialFibrillation, afib as Scalar));
    Ok((rest, PacketBody::Fields(fields)))
}

fn device_on(input: &[u8]) -> IResult<&[u8], PacketBody> {
    let (input, firmware) = opt(tuple((parse_u8, parse_u8)))(input)?;
    let (input, battery_pct) = opt(parse_u8)(input)?;
    Ok((
        input,
        PacketBody::Housekeeping(Housekeeping::DeviceOn {
            firmware,
            battery_pct,
        }),
    ))
}
