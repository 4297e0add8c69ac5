use clap::ValueEnum;
use crossterm::style::Color;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

/// Colors used to render one theme.
#[derive(Debug, Clone, Copy)]
pub struct Palette {
    pub bg: Color,
    pub fg: Color,
    pub accent: Color,
    pub answer: Color,
    pub muted: Color,
    pub error: Color,
}

impl Theme {
    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }

    pub fn palette(self) -> Palette {
        match self {
            Theme::Light => Palette {
                bg: Color::White,
                fg: Color::Black,
                accent: Color::DarkBlue,
                answer: Color::Black,
                muted: Color::DarkGrey,
                error: Color::DarkRed,
            },
            Theme::Dark => Palette {
                bg: Color::Black,
                fg: Color::White,
                accent: Color::Cyan,
                answer: Color::Grey,
                muted: Color::DarkGrey,
                error: Color::Red,
            },
        }
    }
}
