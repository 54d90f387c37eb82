// 工具函数模块
// 包含金额换算、参数解析、签名、验证、二维码生成等通用工具

pub mod amount;
pub mod crypto;
pub mod params;
pub mod qr;
pub mod validation;

// 重新导出常用函数
pub use amount::*;
pub use crypto::*;
pub use params::*;
pub use qr::*;
pub use validation::*;
