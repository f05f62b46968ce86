use filterconfig::{EncodingSetting, ParamSetting, PowerSetting, ThreadPolicySetting};
use filtergpu::{GpuPowerPreference, OutputEncoding, ParamValue, ThreadPolicy};

pub fn map_encoding(setting: EncodingSetting) -> OutputEncoding {
    match setting {
        EncodingSetting::Rgb565 => OutputEncoding::Rgb565,
        EncodingSetting::Rgba8 => OutputEncoding::Rgba8,
    }
}

pub fn map_power(setting: PowerSetting) -> GpuPowerPreference {
    match setting {
        PowerSetting::Low => GpuPowerPreference::Low,
        PowerSetting::High => GpuPowerPreference::High,
    }
}

pub fn map_thread_policy(setting: ThreadPolicySetting) -> ThreadPolicy {
    match setting {
        ThreadPolicySetting::Rebind => ThreadPolicy::Rebind,
        ThreadPolicySetting::Pinned => ThreadPolicy::Pinned,
    }
}

pub fn map_param(setting: ParamSetting) -> ParamValue {
    match setting {
        ParamSetting::Float(v) => ParamValue::Float1(v),
        ParamSetting::Vec2(v) => ParamValue::Float2(v),
        ParamSetting::Int(v) => ParamValue::Int1(v),
        ParamSetting::IVec2(v) => ParamValue::Int2(v),
    }
}
