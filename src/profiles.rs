//! Metadata profiles: which embedded fields a clean keeps.
//!
//! Every `Group:Tag` field falls into one [`Category`], looked up in a fixed
//! table first and guessed from the field name otherwise. A [`Profile`] keeps
//! some categories and drops others; [`KeepPolicy`] combines an optional
//! profile with fields named on the command line.

use std::collections::BTreeSet;
use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Broad grouping of metadata fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Gps,
    Camera,
    Technical,
    Copyright,
    Creative,
    Datetime,
    Privacy,
    Software,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Gps,
        Category::Camera,
        Category::Technical,
        Category::Copyright,
        Category::Creative,
        Category::Datetime,
        Category::Privacy,
        Category::Software,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Category::Gps => "gps",
            Category::Camera => "camera",
            Category::Technical => "technical",
            Category::Copyright => "copyright",
            Category::Creative => "creative",
            Category::Datetime => "datetime",
            Category::Privacy => "privacy",
            Category::Software => "software",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Known fields and their category.
pub const FIELD_CATEGORIES: &[(&str, Category)] = &[
    ("GPS:GPSLatitude", Category::Gps),
    ("GPS:GPSLongitude", Category::Gps),
    ("GPS:GPSAltitude", Category::Gps),
    ("GPS:GPSLatitudeRef", Category::Gps),
    ("GPS:GPSLongitudeRef", Category::Gps),
    ("GPS:GPSAltitudeRef", Category::Gps),
    ("GPS:GPSTimeStamp", Category::Gps),
    ("GPS:GPSDateStamp", Category::Gps),
    ("GPS:GPSMapDatum", Category::Gps),
    ("GPS:GPSVersionID", Category::Gps),
    ("EXIF:Make", Category::Camera),
    ("EXIF:Model", Category::Camera),
    ("EXIF:LensModel", Category::Camera),
    ("EXIF:LensMake", Category::Camera),
    ("EXIF:LensSerialNumber", Category::Camera),
    ("EXIF:SerialNumber", Category::Camera),
    ("EXIF:BodySerialNumber", Category::Camera),
    ("EXIF:CameraOwnerName", Category::Privacy),
    ("EXIF:ExposureTime", Category::Technical),
    ("EXIF:FNumber", Category::Technical),
    ("EXIF:ISO", Category::Technical),
    ("EXIF:ISOSpeedRatings", Category::Technical),
    ("EXIF:FocalLength", Category::Technical),
    ("EXIF:FocalLengthIn35mmFormat", Category::Technical),
    ("EXIF:Flash", Category::Technical),
    ("EXIF:WhiteBalance", Category::Technical),
    ("EXIF:ExposureMode", Category::Technical),
    ("EXIF:ExposureProgram", Category::Technical),
    ("EXIF:MeteringMode", Category::Technical),
    ("EXIF:Orientation", Category::Technical),
    ("EXIF:ResolutionUnit", Category::Technical),
    ("EXIF:XResolution", Category::Technical),
    ("EXIF:YResolution", Category::Technical),
    ("EXIF:ColorSpace", Category::Technical),
    ("EXIF:CompressedBitsPerPixel", Category::Technical),
    ("EXIF:DateTime", Category::Datetime),
    ("EXIF:DateTimeOriginal", Category::Datetime),
    ("EXIF:DateTimeDigitized", Category::Datetime),
    ("EXIF:CreateDate", Category::Datetime),
    ("EXIF:ModifyDate", Category::Datetime),
    ("EXIF:OffsetTime", Category::Datetime),
    ("EXIF:OffsetTimeOriginal", Category::Datetime),
    ("EXIF:OffsetTimeDigitized", Category::Datetime),
    ("EXIF:Copyright", Category::Copyright),
    ("EXIF:Artist", Category::Copyright),
    ("EXIF:ImageDescription", Category::Creative),
    ("IPTC:Caption-Abstract", Category::Creative),
    ("IPTC:Keywords", Category::Creative),
    ("IPTC:Byline", Category::Copyright),
    ("IPTC:CopyrightNotice", Category::Copyright),
    ("IPTC:Credit", Category::Copyright),
    ("IPTC:Source", Category::Copyright),
    ("XMP:Rights", Category::Copyright),
    ("XMP:Creator", Category::Copyright),
    ("XMP:Title", Category::Creative),
    ("XMP:Description", Category::Creative),
    ("XMP:Subject", Category::Creative),
    ("EXIF:Software", Category::Software),
    ("EXIF:ProcessingSoftware", Category::Software),
    ("EXIF:HostComputer", Category::Software),
    ("XMP:CreatorTool", Category::Software),
    ("XMP:MetadataDate", Category::Software),
    ("XMP:ModifyDate", Category::Software),
    ("EXIF:UserComment", Category::Privacy),
    ("IPTC:SpecialInstructions", Category::Privacy),
    ("IPTC:Writer-Editor", Category::Privacy),
    ("XMP:PersonInImage", Category::Privacy),
    ("XMP:LocationShown", Category::Privacy),
    ("XMP:LocationCreated", Category::Privacy),
];

/// Name fragments checked in order for fields missing from [`FIELD_CATEGORIES`].
const NAME_HINTS: &[(&[&str], Category)] = &[
    (&["gps", "latitude", "longitude", "altitude"], Category::Gps),
    (&["copyright", "artist", "creator", "byline"], Category::Copyright),
    (&["make", "model", "serial", "lens"], Category::Camera),
    (&["software", "tool", "application"], Category::Software),
    (&["date", "time", "created", "modified"], Category::Datetime),
    (&["comment", "owner", "person", "location"], Category::Privacy),
];

/// Category of a `Group:Tag` field. Unknown names default to technical.
pub fn categorize_field(field: &str) -> Category {
    if let Some((_, category)) = FIELD_CATEGORIES.iter().find(|(name, _)| *name == field) {
        return *category;
    }
    let lower = field.to_lowercase();
    NAME_HINTS
        .iter()
        .find(|(hints, _)| hints.iter().any(|hint| lower.contains(hint)))
        .map(|(_, category)| *category)
        .unwrap_or(Category::Technical)
}

/// Predefined clean profile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    #[default]
    #[value(name = "remove_all")]
    RemoveAll,
    #[value(name = "copyright_only")]
    CopyrightOnly,
    #[value(name = "remove_privacy")]
    RemovePrivacy,
    #[value(name = "photography_essentials")]
    PhotographyEssentials,
    #[value(name = "social_media")]
    SocialMedia,
    #[value(name = "stock_photography")]
    StockPhotography,
    #[value(name = "professional_portfolio")]
    ProfessionalPortfolio,
    #[value(name = "archive")]
    Archive,
}

impl Profile {
    pub const ALL: [Profile; 8] = [
        Profile::RemoveAll,
        Profile::CopyrightOnly,
        Profile::RemovePrivacy,
        Profile::PhotographyEssentials,
        Profile::SocialMedia,
        Profile::StockPhotography,
        Profile::ProfessionalPortfolio,
        Profile::Archive,
    ];

    /// Command-line name.
    pub fn name(self) -> &'static str {
        match self {
            Profile::RemoveAll => "remove_all",
            Profile::CopyrightOnly => "copyright_only",
            Profile::RemovePrivacy => "remove_privacy",
            Profile::PhotographyEssentials => "photography_essentials",
            Profile::SocialMedia => "social_media",
            Profile::StockPhotography => "stock_photography",
            Profile::ProfessionalPortfolio => "professional_portfolio",
            Profile::Archive => "archive",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Profile::RemoveAll => "Remove All",
            Profile::CopyrightOnly => "Copyright Only",
            Profile::RemovePrivacy => "Remove Privacy Data",
            Profile::PhotographyEssentials => "Photography Essentials",
            Profile::SocialMedia => "Social Media Safe",
            Profile::StockPhotography => "Stock Photography",
            Profile::ProfessionalPortfolio => "Professional Portfolio",
            Profile::Archive => "Archive Preservation",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Profile::RemoveAll => "Remove all metadata for maximum privacy",
            Profile::CopyrightOnly => "Keep only copyright and attribution information",
            Profile::RemovePrivacy => {
                "Remove GPS, personal info and camera details while keeping technical data"
            }
            Profile::PhotographyEssentials => {
                "Keep technical camera settings and copyright, remove location and personal data"
            }
            Profile::SocialMedia => "Remove all potentially sensitive data for social media sharing",
            Profile::StockPhotography => {
                "Optimized for stock photo submissions, technical and creative metadata only"
            }
            Profile::ProfessionalPortfolio => {
                "Keep technical settings and copyright for professional showcase"
            }
            Profile::Archive => "Keep all non-sensitive metadata for archival purposes",
        }
    }

    pub fn preserve_categories(self) -> &'static [Category] {
        use Category::*;
        match self {
            Profile::RemoveAll => &[],
            Profile::CopyrightOnly | Profile::SocialMedia => &[Copyright],
            Profile::RemovePrivacy | Profile::StockPhotography => {
                &[Technical, Copyright, Creative, Datetime]
            }
            Profile::PhotographyEssentials => &[Technical, Copyright, Datetime],
            Profile::ProfessionalPortfolio => &[Technical, Copyright, Creative, Datetime, Camera],
            Profile::Archive => &[Technical, Copyright, Creative, Datetime, Camera, Software],
        }
    }

    pub fn remove_categories(self) -> &'static [Category] {
        use Category::*;
        match self {
            Profile::RemoveAll => &Category::ALL,
            Profile::CopyrightOnly => &[Gps, Privacy, Software, Camera],
            Profile::RemovePrivacy | Profile::StockPhotography => &[Gps, Privacy, Camera, Software],
            Profile::PhotographyEssentials | Profile::ProfessionalPortfolio => {
                &[Gps, Privacy, Software]
            }
            Profile::SocialMedia => &[Gps, Privacy, Camera, Software, Technical],
            Profile::Archive => &[Gps, Privacy],
        }
    }

    /// Individual fields kept even when their category is removed.
    pub fn preserve_fields(self) -> &'static [&'static str] {
        match self {
            Profile::SocialMedia => &["EXIF:Orientation"],
            _ => &[],
        }
    }

    /// Fields of `present` this profile keeps.
    pub fn preserved_fields(self, present: &BTreeSet<String>) -> BTreeSet<String> {
        present
            .iter()
            .filter(|field| {
                if self.preserve_fields().contains(&field.as_str()) {
                    return true;
                }
                let category = categorize_field(field);
                self.preserve_categories().contains(&category)
                    && !self.remove_categories().contains(&category)
            })
            .cloned()
            .collect()
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a clean keeps: a profile plus explicitly named fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeepPolicy {
    pub profile: Option<Profile>,
    pub fields: BTreeSet<String>,
}

impl KeepPolicy {
    /// True when nothing can survive a clean, so fields need not be listed.
    pub fn strips_everything(&self) -> bool {
        self.fields.is_empty() && matches!(self.profile, None | Some(Profile::RemoveAll))
    }

    /// Fields of `present` to keep.
    pub fn preserved_fields(&self, present: &BTreeSet<String>) -> BTreeSet<String> {
        let mut keep = self
            .profile
            .map(|profile| profile.preserved_fields(present))
            .unwrap_or_default();
        keep.extend(present.intersection(&self.fields).cloned());
        keep
    }

    /// Split `present` into kept and removed fields.
    pub fn preview(&self, present: &BTreeSet<String>) -> Preview {
        let preserve = self.preserved_fields(present);
        let remove = present.difference(&preserve).cloned().collect();
        Preview { preserve, remove }
    }
}

/// Outcome of applying a [`KeepPolicy`] to one file's fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Preview {
    pub preserve: BTreeSet<String>,
    pub remove: BTreeSet<String>,
}

impl Preview {
    pub fn total(&self) -> usize {
        self.preserve.len() + self.remove.len()
    }
}
